//! The database handle.
//!
//! `Db` owns the frozen schema, the primary index, the journal and the
//! pending-change table. All operations run on the caller's thread; two
//! operations never interleave. Mutations flow through a shared
//! preparation step (validation, defaults, generated ids, timestamps,
//! templates, type mapping, field selection) and then into the store,
//! the journal and the trigger registry.

use crate::clock;
use crate::commit::{Change, ChangeTable, CommitTimer, Persistence};
use crate::error::{DbError, Result};
use crate::ident;
use crate::item::{Item, StoredItem};
use crate::journal::{self, Journal, JournalRecord};
use crate::query::{self, Params};
use crate::schema::{FieldDef, FieldType, Model, Schema};
use crate::store::{ItemStore, MAX_ITEM, MAX_KEY};
use crate::trigger::{CallbackId, CallbackRegistry, Cmd, Events, TriggerCtx};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default journal size threshold before a forced snapshot (1 MiB).
pub const DEFAULT_MAX_JOURNAL_SIZE: u64 = 1024 * 1024;

/// Default journal age threshold before a forced snapshot (60 s).
pub const DEFAULT_MAX_JOURNAL_AGE: u64 = 60_000;

/// Options for [`Db::open`].
#[derive(Default)]
pub struct DbOptions {
    read_only: bool,
    reset: bool,
    max_journal_size: Option<u64>,
    max_journal_age: Option<u64>,
    timer: Option<Box<dyn CommitTimer>>,
}

impl DbOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never write the snapshot or journal.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Delete any existing snapshot and journal before opening.
    pub fn reset(mut self) -> Self {
        self.reset = true;
        self
    }

    /// Journal byte size that forces a snapshot.
    pub fn max_journal_size(mut self, bytes: u64) -> Self {
        self.max_journal_size = Some(bytes);
        self
    }

    /// Journal age in milliseconds that forces a snapshot.
    pub fn max_journal_age(mut self, ms: u64) -> Self {
        self.max_journal_age = Some(ms);
        self
    }

    /// Timer driver for delayed commits. Without one, deadlines are still
    /// tracked and `Db::service` commits whatever is due when called.
    pub fn timer(mut self, timer: impl CommitTimer + 'static) -> Self {
        self.timer = Some(Box::new(timer));
        self
    }
}

impl std::fmt::Debug for DbOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbOptions")
            .field("read_only", &self.read_only)
            .field("reset", &self.reset)
            .field("max_journal_size", &self.max_journal_size)
            .field("max_journal_age", &self.max_journal_age)
            .field("timer", &self.timer.is_some())
            .finish()
    }
}

/// Which operation a prepared call serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Create,
    Update,
    Remove,
    Get,
    Find,
}

/// Output of the shared preparation step.
#[derive(Debug)]
struct Prepared {
    op: Op,
    model: Option<String>,
    ttl_field: Option<String>,
    props: Map<String, Value>,
    key: String,
    /// Compare keys only up to the search key's length.
    prefix: bool,
}

/// An embedded JSON document database.
pub struct Db {
    schema: Schema,
    store: ItemStore,
    journal: Option<Journal>,
    path: PathBuf,
    read_only: bool,
    max_journal_size: u64,
    max_journal_age: u64,
    context: Map<String, Value>,
    callbacks: CallbackRegistry,
    changes: ChangeTable,
    timer: Option<Box<dyn CommitTimer>>,
    last_error: Option<String>,
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("path", &self.path)
            .field("items", &self.store.len())
            .field("pending", &self.changes.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Db {
    /// Open a database: load the schema, read the snapshot, replay the
    /// journal, then checkpoint if the replay applied anything.
    pub fn open(
        path: impl AsRef<Path>,
        schema_path: impl AsRef<Path>,
        mut options: DbOptions,
    ) -> Result<Db> {
        let schema = Schema::load(schema_path.as_ref())?;
        let path = path.as_ref().to_path_buf();
        let jnl_path = journal::journal_path(&path);

        if options.reset {
            for stale in [&path, &jnl_path, &journal::save_path(&path)] {
                match std::fs::remove_file(stale) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(DbError::CantWrite {
                            path: stale.display().to_string(),
                            source: e,
                        })
                    }
                }
            }
        }

        let mut db = Db {
            schema,
            store: ItemStore::new(),
            journal: None,
            path: path.clone(),
            read_only: options.read_only,
            max_journal_size: options.max_journal_size.unwrap_or(DEFAULT_MAX_JOURNAL_SIZE),
            max_journal_age: options.max_journal_age.unwrap_or(DEFAULT_MAX_JOURNAL_AGE),
            context: Map::new(),
            callbacks: CallbackRegistry::default(),
            changes: ChangeTable::default(),
            timer: options.timer.take(),
            last_error: None,
        };

        if db.path.exists() {
            for (key, value) in journal::read_snapshot(&db.path)? {
                db.store.insert(StoredItem::cold(key, value));
            }
            tracing::debug!(path = %db.path.display(), items = db.store.len(), "snapshot loaded");
        }

        let mut applied = 0usize;
        let mut damaged = false;
        if jnl_path.exists() {
            let (records, damage) = journal::read_journal(&jnl_path)?;
            if let Some(damage) = &damage {
                tracing::warn!(%damage, "journal replay stopped early");
                damaged = true;
            }
            for record in &records {
                match db.apply_record(record) {
                    Ok(()) => applied += 1,
                    Err(err) => {
                        tracing::warn!(error = %err, cmd = %record.cmd, "skipping journal record")
                    }
                }
            }
            if applied > 0 {
                tracing::info!(applied, "journal replayed");
            }
        }

        if !db.read_only {
            db.journal = Some(Journal::open(&jnl_path, clock::now_ms())?);
            // A damaged journal is truncated even when nothing applied, so
            // later appends never land after the garbage tail.
            if applied > 0 || damaged {
                db.checkpoint(clock::now_ms())?;
            }
        }
        Ok(db)
    }

    /// Close the database: stop the timer, commit pending changes and
    /// write a final snapshot if the journal is non-empty.
    ///
    /// Dropping a `Db` without closing loses nothing durable: committed
    /// records remain in the journal and are replayed on the next open.
    pub fn close(mut self) -> Result<()> {
        if let Some(timer) = self.timer.as_mut() {
            timer.cancel();
        }
        if self.read_only {
            return Ok(());
        }
        self.flush_changes();
        if self.journal.as_ref().is_some_and(|j| !j.is_empty()) {
            self.checkpoint(clock::now_ms())?;
        }
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of items in the store.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Count of changes awaiting their delayed commit.
    pub fn pending(&self) -> usize {
        self.changes.len()
    }

    /// Message of the most recent failed operation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Adjust the journal size threshold at runtime.
    pub fn set_max_journal_size(&mut self, bytes: u64) {
        self.max_journal_size = bytes;
    }

    /// Adjust the journal age threshold at runtime.
    pub fn set_max_journal_age(&mut self, ms: u64) {
        self.max_journal_age = ms;
        self.arm_timer();
    }

    // ── Mutations ───────────────────────────────────────────────

    /// Create an item. Fails with `Exists` if the key is taken, unless
    /// `params.upsert` turns the call into a replace.
    pub fn create(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<Item> {
        self.run(|db| db.do_create(model, props, params))
    }

    /// Update an item, merging the given fields. `params.upsert` replaces
    /// the whole document, creating it when missing.
    pub fn update(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<Item> {
        self.run(|db| db.do_update(model, props, params))
    }

    /// Remove matching items, up to `params.limit` (default one).
    /// Returns the number removed.
    pub fn remove(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<usize> {
        self.run(|db| db.do_remove(model, props, params))
    }

    /// Set one field on an item located by `props`. Fails with `NotReady`
    /// when the item is missing and `params.upsert` is not set.
    pub fn set_field(
        &mut self,
        model: &str,
        field: &str,
        value: Value,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.run(|db| db.do_set_field(model, field, value, props, params))
    }

    pub fn set_string(
        &mut self,
        model: &str,
        field: &str,
        value: &str,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.set_field(model, field, Value::String(value.to_string()), props, params)
    }

    pub fn set_bool(
        &mut self,
        model: &str,
        field: &str,
        value: bool,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.set_field(model, field, Value::Bool(value), props, params)
    }

    pub fn set_number(
        &mut self,
        model: &str,
        field: &str,
        value: i64,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.set_field(model, field, Value::from(value), props, params)
    }

    pub fn set_double(
        &mut self,
        model: &str,
        field: &str,
        value: f64,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.set_field(model, field, Value::from(value), props, params)
    }

    /// Set a date field from epoch milliseconds.
    pub fn set_date(
        &mut self,
        model: &str,
        field: &str,
        ms: u64,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        self.set_field(model, field, Value::String(clock::iso_date(ms)), props, params)
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Get one item matching `props`, or None.
    pub fn get(
        &mut self,
        model: Option<&str>,
        props: Value,
        params: &Params,
    ) -> Result<Option<Item>> {
        self.run(|db| {
            let prep = db.setup(Op::Get, model, props, params)?;
            let keys = db.scan(&prep, params, 1)?;
            match keys.first() {
                Some(key) => Ok(Some(db.public_item(key)?)),
                None => Ok(None),
            }
        })
    }

    /// Get one field of one item, rendered as a string.
    pub fn get_field(
        &mut self,
        model: &str,
        field: &str,
        props: Value,
        params: &Params,
    ) -> Result<Option<String>> {
        let item = self.get(Some(model), props, params)?;
        Ok(item.and_then(|i| i.field(field).map(query::match_string)))
    }

    /// Find all items matching `props`, honoring limit and pagination.
    /// The sort key of the last returned item is the next-page cursor.
    pub fn find(
        &mut self,
        model: Option<&str>,
        props: Value,
        params: &Params,
    ) -> Result<Vec<Item>> {
        self.run(|db| {
            let prep = db.setup(Op::Find, model, props, params)?;
            let limit = params.limit.unwrap_or(usize::MAX);
            let keys = db.scan(&prep, params, limit)?;
            keys.iter().map(|key| db.public_item(key)).collect()
        })
    }

    /// Find the first item matching `props`, or None.
    pub fn find_one(
        &mut self,
        model: Option<&str>,
        props: Value,
        params: &Params,
    ) -> Result<Option<Item>> {
        self.run(|db| {
            let prep = db.setup(Op::Find, model, props, params)?;
            let keys = db.scan(&prep, params, 1)?;
            match keys.first() {
                Some(key) => Ok(Some(db.public_item(key)?)),
                None => Ok(None),
            }
        })
    }

    // ── Housekeeping ────────────────────────────────────────────

    /// Remove every expired item of every TTL model. Fires remove
    /// triggers when `notify`. Returns the count removed.
    pub fn remove_expired(&mut self, notify: bool) -> usize {
        let now_iso = clock::now_iso();
        let type_field = self.schema.type_field.clone();
        let ttl_by_model: HashMap<String, String> = self
            .schema
            .models()
            .filter_map(|m| m.ttl_field.clone().map(|f| (m.name.clone(), f)))
            .collect();
        if ttl_by_model.is_empty() {
            return 0;
        }

        let mut expired: Vec<(String, String)> = Vec::new();
        for key in self.store.keys() {
            let Some(item) = self.store.get_mut(&key) else {
                continue;
            };
            let Ok(doc) = item.json() else { continue };
            let Some(model) = doc.get(&type_field).and_then(Value::as_str) else {
                continue;
            };
            let Some(ttl) = ttl_by_model.get(model) else {
                continue;
            };
            if query::is_expired(doc, ttl, &now_iso) {
                expired.push((key.clone(), model.to_string()));
            }
        }

        let count = expired.len();
        for (key, model) in expired {
            self.purge_item(&key, Some(&model), notify);
        }
        if count > 0 {
            tracing::debug!(count, "expired items removed");
            self.maybe_rollover(clock::now_ms());
            self.arm_timer();
        }
        count
    }

    /// Commit due delayed changes and snapshot an over-age journal.
    /// The timer driver's wakeup lands here.
    pub fn service(&mut self) -> Result<()> {
        let now = clock::now_ms();
        for change in self.changes.take_due(now) {
            self.commit_change(change);
        }
        self.maybe_rollover(now);
        self.arm_timer();
        Ok(())
    }

    /// The soonest deadline needing a `service` call: the earliest
    /// pending-change due-time or the journal age limit.
    pub fn next_due(&self) -> Option<u64> {
        let change_due = self.changes.next_due();
        let journal_due = self
            .journal
            .as_ref()
            .filter(|j| !j.is_empty())
            .map(|j| j.created() + self.max_journal_age);
        match (change_due, journal_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Write a snapshot. With a path, export a copy there and leave the
    /// journal alone; without one, commit pending changes, snapshot in
    /// place and truncate the journal.
    pub fn save(&mut self, path: Option<&Path>) -> Result<()> {
        self.run(|db| match path {
            Some(path) => db.write_snapshot_to(path),
            None => {
                if db.read_only {
                    return Err(DbError::BadState("database is read-only".into()));
                }
                db.flush_changes();
                db.checkpoint(clock::now_ms())?;
                db.arm_timer();
                Ok(())
            }
        })
    }

    /// Demote every item to its serialized cold form.
    pub fn compact(&mut self) {
        for item in self.store.iter_mut() {
            item.compact();
        }
    }

    /// Dump every document, in key order.
    pub fn to_json(&mut self) -> Result<Value> {
        let mut docs = Vec::with_capacity(self.store.len());
        for key in self.store.keys() {
            if let Some(item) = self.store.get_mut(&key) {
                docs.push(item.json()?.clone());
            }
        }
        Ok(Value::Array(docs))
    }

    /// Bulk-load items: a top-level object mapping model name to an array
    /// of documents, or to a map of sort-key to document. Each document
    /// loads through the normal pipeline with upsert. Returns the count.
    pub fn load_data(&mut self, data: Value) -> Result<usize> {
        self.run(|db| {
            let Value::Object(sets) = data else {
                return Err(DbError::BadArgs("load data must be an object".into()));
            };
            let params = Params::new().with_upsert();
            let sort_field = db.schema.sort_field.clone();
            let mut count = 0usize;
            for (model, entries) in sets {
                match entries {
                    Value::Array(list) => {
                        for props in list {
                            db.do_create(Some(&model), props, &params)?;
                            count += 1;
                        }
                    }
                    Value::Object(map) => {
                        for (key, mut props) in map {
                            if let Some(obj) = props.as_object_mut() {
                                obj.entry(sort_field.clone())
                                    .or_insert_with(|| Value::String(key));
                            }
                            db.do_create(Some(&model), props, &params)?;
                            count += 1;
                        }
                    }
                    _ => {
                        return Err(DbError::BadArgs(format!(
                            "load data for {model} must be an array or object"
                        )))
                    }
                }
            }
            Ok(count)
        })
    }

    /// Bulk-load items from a JSON5 file.
    pub fn load_data_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| DbError::CantRead {
            path: path.display().to_string(),
            source: e,
        })?;
        let data: Value = json5::from_str(&text)
            .map_err(|e| DbError::BadFormat(format!("{}: {e}", path.display())))?;
        self.load_data(data)
    }

    // ── Callbacks and context ───────────────────────────────────

    /// Register a change trigger, filtered by model (None matches every
    /// model) and event mask.
    pub fn add_callback(
        &mut self,
        model: Option<&str>,
        events: Events,
        func: impl Fn(&TriggerCtx<'_>) + 'static,
    ) -> CallbackId {
        self.callbacks.add(model, events, func)
    }

    pub fn remove_callback(&mut self, id: CallbackId) {
        self.callbacks.remove(id);
    }

    /// Set a context property, merged over every call's properties.
    pub fn add_context(&mut self, name: &str, value: Value) {
        self.context.insert(name.to_string(), value);
    }

    // ── Pipeline ────────────────────────────────────────────────

    fn run<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if let Err(err) = &result {
            self.last_error = Some(err.to_string());
        }
        result
    }

    /// Shared preparation for every operation.
    fn setup(
        &self,
        op: Op,
        model_name: Option<&str>,
        props: Value,
        params: &Params,
    ) -> Result<Prepared> {
        if let Some(index) = &params.index {
            if index != "primary" {
                return Err(DbError::BadArgs(format!("unknown index '{index}'")));
            }
        }
        let mut props = match props {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(DbError::BadArgs("properties must be an object".into())),
        };

        let model_name = match model_name {
            Some(name) => Some(name.to_string()),
            None => props
                .get(&self.schema.type_field)
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let model: Option<&Model> = match &model_name {
            Some(name) => Some(
                self.schema
                    .model(name)
                    .ok_or_else(|| DbError::BadArgs(format!("unknown model '{name}'")))?,
            ),
            None => None,
        };
        if model.is_none() && matches!(op, Op::Create | Op::Update) {
            return Err(DbError::BadArgs("model required".into()));
        }

        // Unknown properties are dropped; enum values are enforced.
        if let Some(model) = model {
            let mut dropped = Vec::new();
            for (name, value) in props.iter() {
                if name == &self.schema.hash_field {
                    dropped.push(name.clone());
                    continue;
                }
                match model.field(name) {
                    Some(def) => {
                        if let Some(allowed) = &def.allowed {
                            let text = query::match_string(value);
                            if !allowed.iter().any(|a| a == &text) {
                                return Err(DbError::BadArgs(format!(
                                    "invalid value '{text}' for {}.{name}",
                                    model.name
                                )));
                            }
                        }
                    }
                    None => {
                        tracing::info!(model = %model.name, field = %name, "dropping unknown property");
                        dropped.push(name.clone());
                    }
                }
            }
            for name in &dropped {
                props.remove(name);
            }
        }

        // Context properties override the caller's at the top level.
        if !params.bypass {
            for (name, value) in &self.context {
                props.insert(name.clone(), value.clone());
            }
        }

        let creating = op == Op::Create || (op == Op::Update && params.upsert);

        // Defaults and generated identifiers.
        if let Some(model) = model {
            if creating {
                for (name, def) in &model.fields {
                    if props.contains_key(name) {
                        continue;
                    }
                    if let Some(default) = &def.default {
                        props.insert(name.clone(), default.clone());
                    } else if let Some(spec) = &def.generate {
                        let id = ident::generate(spec).ok_or_else(|| {
                            DbError::BadArgs(format!(
                                "bad generate '{spec}' for {}.{name}",
                                model.name
                            ))
                        })?;
                        props.insert(name.clone(), Value::String(id));
                    }
                }
            }
        }

        // Timestamps. Replay keeps the originals.
        if self.schema.timestamps && !params.bypass {
            if let Some(model) = model {
                let now = clock::now_iso();
                if creating && model.field("created").is_some() {
                    props.insert("created".into(), Value::String(now.clone()));
                }
                if (creating || op == Op::Update) && model.field("updated").is_some() {
                    props.insert("updated".into(), Value::String(now));
                }
            }
        }

        // Value templates.
        if let Some(model) = model {
            let rendered: Vec<(String, String)> = model
                .fields
                .iter()
                .filter_map(|(name, def)| {
                    def.value
                        .as_ref()
                        .map(|tpl| (name.clone(), query::expand_template(tpl, &props)))
                })
                .collect();
            for (name, text) in rendered {
                props.insert(name, Value::String(text));
            }
        }

        // Type mapping and selection.
        if let Some(model) = model {
            let names: Vec<String> = props.keys().cloned().collect();
            for name in names {
                if let Some(def) = model.field(&name) {
                    if let Some(value) = props.remove(&name) {
                        props.insert(name.clone(), map_type(&model.name, &name, def, value)?);
                    }
                }
            }
            props.retain(|name, _| model.field(name).is_some());
            if creating {
                props.insert(
                    self.schema.type_field.clone(),
                    Value::String(model.name.clone()),
                );
            }
        }

        // The search key is the sort-field property.
        let mut key = props
            .get(&self.schema.sort_field)
            .map(query::match_string)
            .unwrap_or_default();
        let mut prefix = false;
        if query::has_template(&key) {
            let scannable =
                op == Op::Find || (op == Op::Remove && params.limit.is_some_and(|l| l > 0));
            if !scannable {
                return Err(DbError::BadArgs(format!("incomplete sort key '{key}'")));
            }
            let truncated = query::template_prefix(&key).to_string();
            key = truncated;
            prefix = true;
        } else if key.is_empty() && !creating {
            // No sort key at all. Queries scan everything; update must
            // address one item by key.
            if op == Op::Update {
                return Err(DbError::BadArgs("missing sort key".into()));
            }
            prefix = true;
        }
        if key.len() > MAX_KEY {
            return Err(DbError::BadArgs(format!("sort key too long ({})", key.len())));
        }

        // The key alone cannot pick the model, so queries also match on
        // the type field.
        if !creating {
            if let Some(model) = model {
                props.insert(
                    self.schema.type_field.clone(),
                    Value::String(model.name.clone()),
                );
            }
        }

        if params.log {
            tracing::info!(?op, model = ?model_name, %key, prefix, "db call");
        }

        Ok(Prepared {
            op,
            model: model_name,
            ttl_field: model.and_then(|m| m.ttl_field.clone()),
            props,
            key,
            prefix,
        })
    }

    fn do_create(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<Item> {
        let prep = self.setup(Op::Create, model, props, params)?;
        if self.store.contains(&prep.key) {
            if !params.upsert {
                return Err(DbError::Exists(prep.key));
            }
            return self.apply_replace(prep, params);
        }
        self.apply_insert(prep, params)
    }

    fn do_update(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<Item> {
        let prep = self.setup(Op::Update, model, props, params)?;
        let found = self.scan(&prep, params, 1)?.into_iter().next();
        match found {
            Some(key) if params.upsert => {
                let mut prep = prep;
                prep.key = key;
                self.apply_replace(prep, params)
            }
            Some(key) => self.apply_merge(&key, prep, params),
            None if params.upsert => self.apply_insert(prep, params),
            None => Err(DbError::NotFound(prep.key)),
        }
    }

    fn do_remove(&mut self, model: Option<&str>, props: Value, params: &Params) -> Result<usize> {
        let prep = self.setup(Op::Remove, model, props, params)?;
        let limit = params.limit.filter(|l| *l > 0).unwrap_or(1);
        let keys = self.scan(&prep, params, limit)?;
        let mut count = 0;
        for key in keys {
            let Some(mut item) = self.store.remove(&key) else {
                continue;
            };
            let value = item.serialized()?;
            let public = item.to_item()?;
            self.persist(&key, prep.model.as_deref(), Cmd::Remove, params, value, &public);
            count += 1;
        }
        Ok(count)
    }

    fn do_set_field(
        &mut self,
        model: &str,
        field: &str,
        value: Value,
        props: Value,
        params: &Params,
    ) -> Result<Item> {
        let def = self
            .schema
            .model(model)
            .ok_or_else(|| DbError::BadArgs(format!("unknown model '{model}'")))?
            .field(field)
            .ok_or_else(|| DbError::BadArgs(format!("unknown field {model}.{field}")))?
            .clone();
        let mapped = map_type(model, field, &def, value)?;

        let raw = props.clone();
        let prep = self.setup(Op::Update, Some(model), props, params)?;
        let found = self.scan(&prep, params, 1)?.into_iter().next();
        let Some(key) = found else {
            if params.upsert {
                let mut raw = match raw {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    _ => return Err(DbError::BadArgs("properties must be an object".into())),
                };
                raw.insert(field.to_string(), mapped);
                return self.do_create(Some(model), Value::Object(raw), params);
            }
            return Err(DbError::NotReady(format!("no {model} item to set {field}")));
        };

        let stamp = (self.schema.timestamps
            && self
                .schema
                .model(model)
                .is_some_and(|m| m.field("updated").is_some()))
        .then(clock::now_iso);

        let item = self
            .store
            .get_mut(&key)
            .ok_or_else(|| DbError::BadState(format!("missing item {key}")))?;
        let doc = item.json_mut()?;
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| DbError::BadState(format!("item {key} is not an object")))?;
        obj.insert(field.to_string(), mapped);
        if let Some(now) = stamp {
            obj.insert("updated".into(), Value::String(now));
        }
        let value = item.serialized()?;
        check_size(&value)?;
        let public = item.to_item()?;

        let cmd = if params.upsert { Cmd::Upsert } else { Cmd::Update };
        self.persist(&key, Some(model), cmd, params, value, &public);
        Ok(public)
    }

    /// Insert a brand new item prepared by setup.
    fn apply_insert(&mut self, prep: Prepared, params: &Params) -> Result<Item> {
        let model = self.model_of(&prep)?;
        if let Some(model) = model {
            for (name, def) in &model.fields {
                if def.required && !prep.props.contains_key(name) {
                    return Err(DbError::BadArgs(format!(
                        "missing required field {}.{name}",
                        model.name
                    )));
                }
            }
        }
        if prep.key.is_empty() {
            return Err(DbError::BadArgs("missing sort key".into()));
        }

        let doc = Value::Object(prep.props);
        let value = serialize(&prep.key, &doc)?;
        check_size(&value)?;
        let public = Item::new(prep.key.clone(), doc.clone());
        self.store.insert(StoredItem::new(prep.key.clone(), doc));

        let cmd = if params.upsert { Cmd::Upsert } else { Cmd::Create };
        self.persist(&prep.key, prep.model.as_deref(), cmd, params, value, &public);
        Ok(public)
    }

    /// Replace an existing item's document wholesale (upsert).
    fn apply_replace(&mut self, prep: Prepared, params: &Params) -> Result<Item> {
        let model = self.model_of(&prep)?;
        if let Some(model) = model {
            for (name, def) in &model.fields {
                if def.required && !prep.props.contains_key(name) {
                    return Err(DbError::BadArgs(format!(
                        "missing required field {}.{name}",
                        model.name
                    )));
                }
            }
        }

        let doc = Value::Object(prep.props);
        let value = serialize(&prep.key, &doc)?;
        check_size(&value)?;
        let public = Item::new(prep.key.clone(), doc.clone());
        let item = self
            .store
            .get_mut(&prep.key)
            .ok_or_else(|| DbError::BadState(format!("missing item {}", prep.key)))?;
        item.set_json(doc);

        self.persist(
            &prep.key,
            prep.model.as_deref(),
            Cmd::Upsert,
            params,
            value,
            &public,
        );
        Ok(public)
    }

    /// Merge prepared fields into an existing item (plain update).
    fn apply_merge(&mut self, key: &str, prep: Prepared, params: &Params) -> Result<Item> {
        let item = self
            .store
            .get_mut(key)
            .ok_or_else(|| DbError::BadState(format!("missing item {key}")))?;
        let mut doc = item.json()?.clone();
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| DbError::BadState(format!("item {key} is not an object")))?;
        for (name, value) in prep.props {
            obj.insert(name, value);
        }
        let value = serialize(key, &doc)?;
        check_size(&value)?;
        let public = Item::new(key.to_string(), doc.clone());
        if let Some(item) = self.store.get_mut(key) {
            item.set_json(doc);
        }
        self.persist(key, prep.model.as_deref(), Cmd::Update, params, value, &public);
        Ok(public)
    }

    fn model_of(&self, prep: &Prepared) -> Result<Option<&Model>> {
        match &prep.model {
            Some(name) => self
                .schema
                .model(name)
                .map(Some)
                .ok_or_else(|| DbError::BadArgs(format!("unknown model '{name}'"))),
            None => Ok(None),
        }
    }

    /// Walk the index from the prepared position, collecting up to
    /// `limit` matching keys. Expired candidates are removed afterwards.
    fn scan(&mut self, prep: &Prepared, params: &Params, limit: usize) -> Result<Vec<String>> {
        let sort_field = self.schema.sort_field.clone();
        let type_field = self.schema.type_field.clone();
        let now_iso = prep.ttl_field.as_ref().map(|_| clock::now_iso());

        // Update carries its new payload in `props`, so it locates items
        // by key and model alone; the other operations property-match.
        let type_only: Map<String, Value> = prep
            .props
            .get(&type_field)
            .map(|v| {
                let mut only = Map::new();
                only.insert(type_field.clone(), v.clone());
                only
            })
            .unwrap_or_default();
        let match_props: &Map<String, Value> = if prep.op == Op::Update {
            &type_only
        } else {
            &prep.props
        };

        let mut keys = Vec::new();
        let mut expired = Vec::new();
        let mut cursor: Option<String> = match &params.next {
            // Position at the cursor key and advance one.
            Some(next) => self.store.next_key(next),
            None if prep.prefix => {
                if prep.key.is_empty() {
                    self.store.first_key()
                } else {
                    self.store.first_with_prefix(&prep.key).map(str::to_string)
                }
            }
            None => self.store.get(&prep.key).map(|i| i.key.clone()),
        };

        while let Some(key) = cursor {
            if prep.prefix {
                if !key.starts_with(&prep.key) {
                    break;
                }
            } else if key != prep.key {
                break;
            }

            let Some(item) = self.store.get_mut(&key) else {
                break;
            };
            let doc = item.json()?;
            let mut matched = query::props_match(doc, match_props, &sort_field);
            if matched {
                if let Some(filter) = &params.filter {
                    matched = (**filter)(doc);
                }
            }
            if matched {
                if let (Some(ttl), Some(now)) = (&prep.ttl_field, &now_iso) {
                    if query::is_expired(doc, ttl, now) {
                        expired.push(key.clone());
                        matched = false;
                    }
                }
            }
            if matched {
                keys.push(key.clone());
                if keys.len() >= limit {
                    break;
                }
            }
            if !prep.prefix {
                break;
            }
            cursor = self.store.next_key(&key);
        }

        // Query teardown: lazily drop what TTL ruled out.
        for key in expired {
            self.purge_item(&key, prep.model.as_deref(), false);
        }
        Ok(keys)
    }

    fn public_item(&mut self, key: &str) -> Result<Item> {
        self.store
            .get_mut(key)
            .ok_or_else(|| DbError::BadState(format!("missing item {key}")))?
            .to_item()
    }

    // ── Persistence ─────────────────────────────────────────────

    fn resolve_persistence(&self, model: Option<&str>, params: &Params) -> Persistence {
        if let Some(persist) = params.persist {
            return persist;
        }
        if let Some(model) = model.and_then(|name| self.schema.model(name)) {
            if model.mem {
                return Persistence::InMem;
            }
            if model.delay > 0 {
                return Persistence::Deferred(model.delay);
            }
        }
        Persistence::Immediate
    }

    /// Route a mutation to the journal, the pending-change table or
    /// nowhere, and fire the matching triggers.
    fn persist(
        &mut self,
        key: &str,
        model: Option<&str>,
        cmd: Cmd,
        params: &Params,
        value: String,
        item: &Item,
    ) {
        match self.resolve_persistence(model, params) {
            Persistence::InMem => {
                if cmd == Cmd::Remove {
                    self.changes.discard(key);
                }
                self.callbacks
                    .fire(model, item, cmd, Events::CHANGE | Events::COMMIT);
            }
            Persistence::Immediate => {
                self.changes.discard(key);
                if !params.bypass && !self.read_only {
                    self.journal_append(cmd, model, &value);
                }
                self.callbacks
                    .fire(model, item, cmd, Events::CHANGE | Events::COMMIT);
                self.maybe_rollover(clock::now_ms());
            }
            Persistence::Deferred(ms) => {
                let due = clock::now_ms() + ms;
                let carried = (cmd == Cmd::Remove).then_some(value);
                self.changes.push(key, model, cmd, due, carried);
                if let Some(item) = self.store.get_mut(key) {
                    item.delayed = true;
                }
                self.callbacks.fire(model, item, cmd, Events::CHANGE);
            }
        }
        self.arm_timer();
    }

    /// Journal one record. Failures flag the journal; the mutation has
    /// already succeeded in memory.
    fn journal_append(&mut self, cmd: Cmd, model: Option<&str>, value: &str) {
        let Some(journal) = self.journal.as_mut() else {
            return;
        };
        if let Err(err) = journal.append(cmd.as_str(), model.unwrap_or(""), value) {
            tracing::warn!(error = %err, "journal write failed; forcing snapshot");
        }
    }

    /// Write the delayed change for one item to the journal.
    fn commit_change(&mut self, change: Change) {
        let value = match self.store.get(&change.key) {
            Some(item) => item.serialized().ok(),
            None => change.value.clone(),
        };
        let Some(value) = value else { return };
        if !self.read_only {
            self.journal_append(change.cmd, change.model.as_deref(), &value);
        }
        if let Some(item) = self.store.get_mut(&change.key) {
            item.delayed = false;
        }
        if !self.callbacks.is_empty() {
            if let Ok(doc) = serde_json::from_str(&value) {
                let public = Item::new(change.key.clone(), doc);
                self.callbacks
                    .fire(change.model.as_deref(), &public, change.cmd, Events::COMMIT);
            }
        }
    }

    fn flush_changes(&mut self) {
        for change in self.changes.take_all() {
            self.commit_change(change);
        }
    }

    /// Remove an item outside the normal remove operation (TTL).
    fn purge_item(&mut self, key: &str, model: Option<&str>, notify: bool) {
        let Some(mut item) = self.store.remove(key) else {
            return;
        };
        self.changes.discard(key);
        let Ok(value) = item.serialized() else { return };
        if !self.read_only {
            self.journal_append(Cmd::Remove, model, &value);
        }
        if notify && !self.callbacks.is_empty() {
            if let Ok(doc) = item.json() {
                let public = Item::new(key.to_string(), doc.clone());
                self.callbacks
                    .fire(model, &public, Cmd::Remove, Events::CHANGE | Events::COMMIT);
            }
        }
    }

    /// Snapshot when the journal is over size, over age or errored.
    fn maybe_rollover(&mut self, now: u64) {
        let Some(journal) = self.journal.as_ref() else {
            return;
        };
        if journal.is_empty() && !journal.errored {
            return;
        }
        if journal.errored
            || journal.size() >= self.max_journal_size
            || journal.age(now) >= self.max_journal_age
        {
            if let Err(err) = self.checkpoint(now) {
                tracing::warn!(error = %err, "snapshot rollover failed");
            }
        }
    }

    /// Write a full snapshot and truncate the journal.
    fn checkpoint(&mut self, now: u64) -> Result<()> {
        self.write_snapshot_to(&self.path.clone())?;
        if let Some(journal) = self.journal.as_mut() {
            journal.reset(now)?;
        }
        tracing::debug!(path = %self.path.display(), items = self.store.len(), "snapshot written");
        Ok(())
    }

    fn write_snapshot_to(&mut self, path: &Path) -> Result<()> {
        let mut items: Vec<(String, String)> = Vec::with_capacity(self.store.len());
        for item in self.store.iter() {
            items.push((item.key.clone(), item.serialized()?));
        }
        journal::write_snapshot(path, items.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn arm_timer(&mut self) {
        let due = self.next_due();
        if let Some(timer) = self.timer.as_mut() {
            match due {
                Some(deadline) => timer.schedule(deadline),
                None => timer.cancel(),
            }
        }
    }

    // ── Recovery ────────────────────────────────────────────────

    /// Re-issue one journal record through the pipeline. Bypass keeps the
    /// record from being re-journaled and timestamps from being bumped.
    fn apply_record(&mut self, record: &JournalRecord) -> Result<()> {
        let cmd = Cmd::parse(&record.cmd)
            .ok_or_else(|| DbError::BadFormat(format!("unknown journal cmd '{}'", record.cmd)))?;
        let props: Value = serde_json::from_str(&record.value)
            .map_err(|e| DbError::BadFormat(format!("journal value: {e}")))?;
        let model = (!record.model.is_empty()).then_some(record.model.as_str());
        match cmd {
            Cmd::Create | Cmd::Upsert => {
                self.do_create(model, props, &Params::new().with_bypass().with_upsert())?;
            }
            Cmd::Update => {
                self.do_update(model, props, &Params::new().with_bypass().with_upsert())?;
            }
            Cmd::Remove => {
                self.do_remove(model, props, &Params::new().with_bypass())?;
            }
        }
        Ok(())
    }
}

fn serialize(key: &str, doc: &Value) -> Result<String> {
    serde_json::to_string(doc)
        .map_err(|e| DbError::BadState(format!("unserializable item {key}: {e}")))
}

fn check_size(value: &str) -> Result<()> {
    if value.len() > MAX_ITEM {
        return Err(DbError::WontFit {
            size: value.len(),
            limit: MAX_ITEM,
        });
    }
    Ok(())
}

/// Coerce or verify one property against its declared type.
fn map_type(model: &str, name: &str, def: &FieldDef, value: Value) -> Result<Value> {
    let Some(ftype) = def.field_type else {
        return Ok(value);
    };
    let reject = |value: &Value| {
        DbError::BadArgs(format!(
            "cannot map {model}.{name} value {value} to {ftype}"
        ))
    };
    match ftype {
        FieldType::Date => match value {
            Value::Number(n) => {
                let raw = n.as_f64().ok_or_else(|| reject(&Value::Number(n.clone())))?;
                // Small values are epoch seconds, large ones milliseconds.
                let ms = if raw < 100_000_000_000.0 { raw * 1000.0 } else { raw };
                Ok(Value::String(clock::iso_date(ms.round() as u64)))
            }
            Value::String(s) if s.ends_with('Z') => Ok(Value::String(s)),
            other => Err(reject(&other)),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::String(s) if s == "true" || s == "1" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" || s == "0" => Ok(Value::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(Value::Bool(true)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(Value::Bool(false)),
            other => Err(reject(&other)),
        },
        FieldType::Number => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => {
                if let Ok(i) = s.parse::<i64>() {
                    Ok(Value::from(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    serde_json::Number::from_f64(f)
                        .map(Value::Number)
                        .ok_or_else(|| reject(&Value::String(s.clone())))
                } else {
                    Err(reject(&Value::String(s)))
                }
            }
            other => Err(reject(&other)),
        },
        FieldType::String => match value {
            Value::String(s) => Ok(Value::String(s)),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Null => Ok(Value::Null),
            other => Err(reject(&other)),
        },
        FieldType::Object => match value {
            Value::Object(map) => Ok(Value::Object(map)),
            other => Err(reject(&other)),
        },
        FieldType::Array => match value {
            Value::Array(list) => Ok(Value::Array(list)),
            other => Err(reject(&other)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;
    use tempfile::TempDir;

    const SCHEMA: &str = r#"{
        params: { timestamps: true },
        indexes: { primary: { hash: 'pk', sort: 'id' } },
        models: {
            User: {
                id:       { type: 'string', generate: 'uid(10)' },
                username: { type: 'string', required: true },
                email:    { type: 'string' },
                role:     { type: 'string', enum: ['user', 'admin', 'guest', 'super'], default: 'user' },
                deviceId: { type: 'string' },
                balance:  { type: 'number' },
                active:   { type: 'boolean' },
                seen:     { type: 'date' },
                profile:  { type: 'object' },
                created:  { type: 'date' },
                updated:  { type: 'date' },
            },
            Event: {
                id:      { type: 'string', generate: 'ulid' },
                kind:    { type: 'string' },
                expires: { type: 'date', ttl: true },
            },
            Device: {
                id:     { value: 'device#${serial}' },
                serial: { type: 'string', required: true },
                state:  { type: 'string' },
            },
            Item: {
                id:  { type: 'string' },
                seq: { type: 'number' },
            },
        },
    }"#;

    fn setup_files() -> (TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json5");
        std::fs::write(&schema, SCHEMA).unwrap();
        let db_path = dir.path().join("state.db");
        (dir, db_path, schema)
    }

    fn open_db(db_path: &Path, schema: &Path) -> Db {
        Db::open(db_path, schema, DbOptions::new()).unwrap()
    }

    #[test]
    fn create_get_round_trip() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let user = db
            .create(
                Some("User"),
                json!({"username": "admin", "email": "a@b", "role": "admin"}),
                &Params::new(),
            )
            .unwrap();

        let id = user.field_str("id").unwrap().to_string();
        assert_eq!(id.len(), 10);
        assert_eq!(user.field_str("username"), Some("admin"));
        assert_eq!(user.field_str("_type"), Some("User"));
        assert!(user.field_str("created").unwrap().ends_with('Z'));

        let found = db
            .get(Some("User"), json!({"id": id}), &Params::new())
            .unwrap()
            .unwrap();
        assert_eq!(found.json(), user.json());
    }

    #[test]
    fn create_applies_defaults() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let user = db
            .create(Some("User"), json!({"username": "x"}), &Params::new())
            .unwrap();
        assert_eq!(user.field_str("role"), Some("user"));
    }

    #[test]
    fn enum_violation_leaves_store_unchanged() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let result = db.create(
            Some("User"),
            json!({"username": "x", "email": "x@y", "role": "wizard"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::BadArgs(_))));
        assert!(db.last_error().unwrap().contains("wizard"));

        let all = db.find(Some("User"), Value::Null, &Params::new()).unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn create_duplicate_fails_without_upsert() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "X", "username": "a"}), &Params::new())
            .unwrap();
        let result = db.create(
            Some("User"),
            json!({"id": "X", "username": "b"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::Exists(_))));
    }

    #[test]
    fn upsert_create_then_replace() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);
        let upsert = Params::new().with_upsert();

        let first = db
            .create(
                Some("User"),
                json!({"id": "X", "username": "a", "role": "user"}),
                &upsert,
            )
            .unwrap();
        assert_eq!(first.field_str("role"), Some("user"));

        let second = db
            .create(
                Some("User"),
                json!({"id": "X", "username": "a", "role": "admin"}),
                &upsert,
            )
            .unwrap();
        assert_eq!(second.field_str("role"), Some("admin"));

        let all = db
            .find(Some("User"), json!({"id": "X"}), &Params::new())
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].field_str("role"), Some("admin"));
    }

    #[test]
    fn update_merges_and_retains_fields() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(
            Some("User"),
            json!({"id": "u1", "username": "a", "email": "a@b"}),
            &Params::new(),
        )
        .unwrap();

        let updated = db
            .update(
                Some("User"),
                json!({"id": "u1", "role": "admin"}),
                &Params::new(),
            )
            .unwrap();
        assert_eq!(updated.field_str("role"), Some("admin"));
        // Fields not in the update survive.
        assert_eq!(updated.field_str("email"), Some("a@b"));
        assert_eq!(updated.field_str("username"), Some("a"));
    }

    #[test]
    fn update_missing_fails_unless_upsert() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let result = db.update(
            Some("User"),
            json!({"id": "ghost", "username": "g"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::NotFound(_))));

        let created = db
            .update(
                Some("User"),
                json!({"id": "ghost", "username": "g"}),
                &Params::new().with_upsert(),
            )
            .unwrap();
        assert_eq!(created.field_str("username"), Some("g"));
        assert_eq!(created.field_str("role"), Some("user"));
    }

    #[test]
    fn update_without_sort_key_is_rejected() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(
            Some("User"),
            json!({"id": "u1", "username": "a", "role": "user"}),
            &Params::new(),
        )
        .unwrap();

        // An update cannot address an item without its key; it must not
        // fall back to scanning and mutating whatever matches first.
        let result = db.update(Some("User"), json!({"role": "admin"}), &Params::new());
        assert!(matches!(result, Err(DbError::BadArgs(_))));
        assert!(db.last_error().unwrap().contains("sort key"));

        let user = db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .unwrap();
        assert_eq!(user.field_str("role"), Some("user"));
    }

    #[test]
    fn remove_deletes_and_counts() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        let count = db
            .remove(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(count, 1);
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_none());
        assert_eq!(
            db.remove(Some("User"), json!({"id": "u1"}), &Params::new())
                .unwrap(),
            0
        );
    }

    #[test]
    fn ttl_hides_and_lazily_removes() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let past = clock::iso_date(clock::now_ms() - 1000);
        db.create(
            Some("Event"),
            json!({"id": "e1", "kind": "boot", "expires": past}),
            &Params::new(),
        )
        .unwrap();

        assert!(db
            .get(Some("Event"), json!({"id": "e1"}), &Params::new())
            .unwrap()
            .is_none());
        // The query teardown removed it from the index.
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn ttl_sweep_removes_expired() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let soon = clock::iso_date(clock::now_ms() + 150);
        db.create(
            Some("Event"),
            json!({"id": "e1", "kind": "boot", "expires": soon}),
            &Params::new(),
        )
        .unwrap();

        assert!(db
            .get(Some("Event"), json!({"id": "e1"}), &Params::new())
            .unwrap()
            .is_some());

        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(db.remove_expired(false), 1);
        assert!(db
            .get(Some("Event"), json!({"id": "e1"}), &Params::new())
            .unwrap()
            .is_none());
        assert!(db.find(Some("Event"), Value::Null, &Params::new()).unwrap().is_empty());
    }

    #[test]
    fn pagination_covers_all_items_once() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        for n in 0..100 {
            db.create(
                Some("Item"),
                json!({"id": format!("{n:04}"), "seq": n}),
                &Params::new(),
            )
            .unwrap();
        }

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..4 {
            let mut params = Params::new().with_limit(25);
            if let Some(next) = &cursor {
                params = params.with_next(next.clone());
            }
            let page = db.find(Some("Item"), Value::Null, &params).unwrap();
            assert_eq!(page.len(), 25);
            cursor = page.last().map(|i| i.key().to_string());
            ids.extend(page.iter().map(|i| i.key().to_string()));
        }

        let expected: Vec<String> = (0..100).map(|n| format!("{n:04}")).collect();
        assert_eq!(ids, expected);

        // The cursor is exhausted.
        let tail = db
            .find(
                Some("Item"),
                Value::Null,
                &Params::new().with_limit(25).with_next(cursor.unwrap()),
            )
            .unwrap();
        assert!(tail.is_empty());
    }

    #[test]
    fn crash_recovery_replays_journal() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(
                Some("User"),
                json!({"id": "u1", "username": "a", "role": "user"}),
                &Params::new(),
            )
            .unwrap();
            db.update(
                Some("User"),
                json!({"id": "u1", "role": "admin"}),
                &Params::new(),
            )
            .unwrap();
            // Simulated crash: no close, no final snapshot.
            drop(db);
        }

        let mut db = open_db(&db_path, &schema);
        let user = db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .unwrap();
        assert_eq!(user.field_str("role"), Some("admin"));
        assert_eq!(user.field_str("username"), Some("a"));
    }

    #[test]
    fn torn_journal_keeps_the_good_prefix() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
                .unwrap();
            db.create(Some("User"), json!({"id": "u2", "username": "b"}), &Params::new())
                .unwrap();
            drop(db);
        }

        // Tear the last record, as a mid-write power loss would.
        let jnl = journal::journal_path(&db_path);
        let len = std::fs::metadata(&jnl).unwrap().len();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&jnl)
            .unwrap()
            .set_len(len - 5)
            .unwrap();

        let mut db = open_db(&db_path, &schema);
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_some());
        assert!(db
            .get(Some("User"), json!({"id": "u2"}), &Params::new())
            .unwrap()
            .is_none());
        // The damaged tail was checkpointed away; a clean journal remains.
        assert_eq!(std::fs::metadata(&jnl).unwrap().len(), 2);
    }

    #[test]
    fn clean_close_round_trip() {
        let (_dir, db_path, schema) = setup_files();

        let before = {
            let mut db = open_db(&db_path, &schema);
            for n in 0..5 {
                db.create(
                    Some("Item"),
                    json!({"id": format!("i{n}"), "seq": n}),
                    &Params::new(),
                )
                .unwrap();
            }
            db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
                .unwrap();
            let dump = db.to_json().unwrap();
            db.close().unwrap();
            dump
        };

        let mut db = open_db(&db_path, &schema);
        assert_eq!(db.to_json().unwrap(), before);
    }

    #[test]
    fn journal_rollover_by_size() {
        let (_dir, db_path, schema) = setup_files();

        let mut db = Db::open(&db_path, &schema, DbOptions::new().max_journal_size(1)).unwrap();
        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        // Every write exceeds the threshold, so the snapshot is current.
        assert!(db_path.exists());
        drop(db);

        let mut db = open_db(&db_path, &schema);
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_some());
    }

    #[test]
    fn delayed_commit_coalesces_and_fires_on_service() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let events: Rc<RefCell<Vec<(Cmd, Events)>>> = Rc::new(RefCell::new(Vec::new()));
        let log = events.clone();
        db.add_callback(Some("User"), Events::CHANGE | Events::COMMIT, move |ctx| {
            log.borrow_mut().push((ctx.cmd, ctx.events));
        });

        let deferred = Params::new().with_persist(Persistence::Deferred(50));
        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &deferred)
            .unwrap();
        db.update(Some("User"), json!({"id": "u1", "role": "admin"}), &deferred)
            .unwrap();

        // Both mutations coalesced into one pending change; only CHANGE
        // callbacks have fired.
        assert_eq!(db.pending(), 1);
        assert!(events.borrow().iter().all(|(_, e)| *e == Events::CHANGE));

        // Not due yet.
        db.service().unwrap();
        assert_eq!(db.pending(), 1);

        std::thread::sleep(std::time::Duration::from_millis(60));
        db.service().unwrap();
        assert_eq!(db.pending(), 0);
        let seen = events.borrow();
        assert_eq!(seen.last().unwrap().1, Events::COMMIT);
    }

    #[test]
    fn deferred_mutation_is_visible_before_commit() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let deferred = Params::new().with_persist(Persistence::Deferred(10_000));
        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &deferred)
            .unwrap();
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_some());
        assert!(db.next_due().is_some());
    }

    #[test]
    fn close_flushes_pending_changes() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(
                Some("User"),
                json!({"id": "u1", "username": "a"}),
                &Params::new().with_persist(Persistence::Deferred(60_000)),
            )
            .unwrap();
            db.close().unwrap();
        }

        let mut db = open_db(&db_path, &schema);
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_some());
    }

    #[test]
    fn in_mem_mutations_do_not_persist() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(
                Some("User"),
                json!({"id": "u1", "username": "a"}),
                &Params::new().with_persist(Persistence::InMem),
            )
            .unwrap();
            db.close().unwrap();
        }

        let mut db = open_db(&db_path, &schema);
        assert!(db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn immediate_callbacks_fire_change_and_commit_together() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let events: Rc<RefCell<Vec<Events>>> = Rc::new(RefCell::new(Vec::new()));
        let log = events.clone();
        let id = db.add_callback(None, Events::CHANGE | Events::COMMIT, move |ctx| {
            log.borrow_mut().push(ctx.events);
        });

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        assert_eq!(events.borrow().as_slice(), &[Events::CHANGE | Events::COMMIT]);

        db.remove_callback(id);
        db.create(Some("User"), json!({"id": "u2", "username": "b"}), &Params::new())
            .unwrap();
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn remove_fires_remove_trigger() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let removed: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let log = removed.clone();
        db.add_callback(Some("User"), Events::CHANGE, move |ctx| {
            if ctx.cmd == Cmd::Remove {
                log.borrow_mut().push(ctx.item.key().to_string());
            }
        });

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        db.remove(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(removed.borrow().as_slice(), &["u1".to_string()]);
    }

    #[test]
    fn context_properties_merge_into_mutations() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.add_context("deviceId", json!("dev-7"));
        let user = db
            .create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        assert_eq!(user.field_str("deviceId"), Some("dev-7"));

        // Context overrides the caller's value.
        let user = db
            .create(
                Some("User"),
                json!({"id": "u2", "username": "b", "deviceId": "other"}),
                &Params::new(),
            )
            .unwrap();
        assert_eq!(user.field_str("deviceId"), Some("dev-7"));
    }

    #[test]
    fn set_field_variants() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();

        let item = db
            .set_string("User", "role", "admin", json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(item.field_str("role"), Some("admin"));

        let item = db
            .set_number("User", "balance", 42, json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(item.field_number("balance"), Some(42.0));

        let item = db
            .set_bool("User", "active", true, json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(item.field_bool("active"), Some(true));

        let instant = 1_706_745_600_123;
        let item = db
            .set_date("User", "seen", instant, json!({"id": "u1"}), &Params::new())
            .unwrap();
        assert_eq!(item.field_date("seen"), Some(instant));

        // Missing item without upsert is NotReady; with upsert it creates.
        let result = db.set_string("User", "role", "admin", json!({"id": "nope"}), &Params::new());
        assert!(matches!(result, Err(DbError::NotReady(_))));
        let created = db
            .set_string(
                "User",
                "username",
                "ghost",
                json!({"id": "g1"}),
                &Params::new().with_upsert(),
            )
            .unwrap();
        assert_eq!(created.field_str("username"), Some("ghost"));
    }

    #[test]
    fn get_field_renders_strings() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(
            Some("User"),
            json!({"id": "u1", "username": "a", "balance": 7}),
            &Params::new(),
        )
        .unwrap();

        assert_eq!(
            db.get_field("User", "username", json!({"id": "u1"}), &Params::new())
                .unwrap()
                .as_deref(),
            Some("a")
        );
        assert_eq!(
            db.get_field("User", "balance", json!({"id": "u1"}), &Params::new())
                .unwrap()
                .as_deref(),
            Some("7")
        );
        assert_eq!(
            db.get_field("User", "role", json!({"id": "zz"}), &Params::new())
                .unwrap(),
            None
        );
    }

    #[test]
    fn date_mapping_from_epoch_numbers() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        // Milliseconds in, ISO out, recovered to the same instant.
        let ms: u64 = 1_706_745_600_123;
        let user = db
            .create(
                Some("User"),
                json!({"id": "u1", "username": "a", "seen": ms}),
                &Params::new(),
            )
            .unwrap();
        assert!(user.field_str("seen").unwrap().ends_with('Z'));
        assert_eq!(user.field_date("seen"), Some(ms));

        // Seconds are scaled.
        let user = db
            .create(
                Some("User"),
                json!({"id": "u2", "username": "b", "seen": 1_706_745_600}),
                &Params::new(),
            )
            .unwrap();
        assert_eq!(user.field_date("seen"), Some(1_706_745_600_000));

        // A date string must be UTC.
        let result = db.create(
            Some("User"),
            json!({"id": "u3", "username": "c", "seen": "2026-08-01T10:00:00+02:00"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::BadArgs(_))));
    }

    #[test]
    fn type_mapping_coercions() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let user = db
            .create(
                Some("User"),
                json!({"id": "u1", "username": "a", "balance": "12", "active": "1"}),
                &Params::new(),
            )
            .unwrap();
        assert_eq!(user.field_number("balance"), Some(12.0));
        assert_eq!(user.field_bool("active"), Some(true));

        let result = db.create(
            Some("User"),
            json!({"id": "u2", "username": "b", "balance": "not a number"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::BadArgs(_))));

        let result = db.create(
            Some("User"),
            json!({"id": "u3", "username": "c", "active": "maybe"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::BadArgs(_))));
    }

    #[test]
    fn unknown_properties_are_dropped() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let user = db
            .create(
                Some("User"),
                json!({"id": "u1", "username": "a", "shoeSize": 44, "pk": "ignored"}),
                &Params::new(),
            )
            .unwrap();
        assert!(user.field("shoeSize").is_none());
        assert!(user.field("pk").is_none());
    }

    #[test]
    fn templated_keys_prefix_scan() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("Device"), json!({"serial": "s1", "state": "on"}), &Params::new())
            .unwrap();
        db.create(Some("Device"), json!({"serial": "s2", "state": "off"}), &Params::new())
            .unwrap();
        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();

        // The unresolved ${serial} truncates to the `device#` prefix.
        let devices = db.find(Some("Device"), Value::Null, &Params::new()).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].key(), "device#s1");

        // get cannot run on an incomplete key.
        let result = db.get(Some("Device"), Value::Null, &Params::new());
        assert!(matches!(result, Err(DbError::BadArgs(_))));

        // remove with an explicit limit may scan.
        let count = db
            .remove(Some("Device"), Value::Null, &Params::new().with_limit(10))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn find_matches_properties_and_filter() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        for (id, role) in [("u1", "admin"), ("u2", "user"), ("u3", "admin")] {
            db.create(
                Some("User"),
                json!({"id": id, "username": id, "role": role}),
                &Params::new(),
            )
            .unwrap();
        }

        let admins = db
            .find(Some("User"), json!({"role": "admin"}), &Params::new())
            .unwrap();
        assert_eq!(admins.len(), 2);

        let filtered = db
            .find(
                Some("User"),
                Value::Null,
                &Params::new().with_filter(|doc| doc["username"] == "u2"),
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].key(), "u2");
    }

    #[test]
    fn find_without_model_returns_everything() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        db.create(Some("Item"), json!({"id": "i1", "seq": 1}), &Params::new())
            .unwrap();

        let all = db.find(None, Value::Null, &Params::new()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn find_one_returns_first_match() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("Item"), json!({"id": "i1", "seq": 1}), &Params::new())
            .unwrap();
        db.create(Some("Item"), json!({"id": "i2", "seq": 2}), &Params::new())
            .unwrap();

        let first = db.find_one(Some("Item"), Value::Null, &Params::new()).unwrap();
        assert_eq!(first.unwrap().key(), "i1");
    }

    #[test]
    fn load_data_accepts_both_shapes() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let count = db
            .load_data(json!({
                "User": [
                    {"id": "u1", "username": "a"},
                    {"id": "u2", "username": "b"},
                ],
                "Item": {
                    "i1": {"seq": 1},
                    "i2": {"seq": 2},
                },
            }))
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(db.len(), 4);
        assert!(db
            .get(Some("Item"), json!({"id": "i2"}), &Params::new())
            .unwrap()
            .is_some());
    }

    #[test]
    fn compact_keeps_reads_working() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        db.compact();
        let user = db
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .unwrap();
        assert_eq!(user.field_str("username"), Some("a"));
    }

    #[test]
    fn read_only_never_touches_disk() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
                .unwrap();
            db.close().unwrap();
        }
        let journal_len = std::fs::metadata(journal::journal_path(&db_path))
            .unwrap()
            .len();

        {
            let mut db = Db::open(&db_path, &schema, DbOptions::new().read_only()).unwrap();
            // In-memory mutation is allowed but never journaled.
            db.create(Some("User"), json!({"id": "u2", "username": "b"}), &Params::new())
                .unwrap();
            assert!(matches!(db.save(None), Err(DbError::BadState(_))));
            db.close().unwrap();
        }

        assert_eq!(
            std::fs::metadata(journal::journal_path(&db_path)).unwrap().len(),
            journal_len
        );
        let mut db = open_db(&db_path, &schema);
        assert!(db
            .get(Some("User"), json!({"id": "u2"}), &Params::new())
            .unwrap()
            .is_none());
    }

    #[test]
    fn reset_discards_previous_state() {
        let (_dir, db_path, schema) = setup_files();

        {
            let mut db = open_db(&db_path, &schema);
            db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
                .unwrap();
            db.close().unwrap();
        }

        let mut db = Db::open(&db_path, &schema, DbOptions::new().reset()).unwrap();
        assert!(db.is_empty());
        assert!(db.find(None, Value::Null, &Params::new()).unwrap().is_empty());
    }

    #[test]
    fn save_to_explicit_path_exports_a_copy() {
        let (dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        db.create(Some("User"), json!({"id": "u1", "username": "a"}), &Params::new())
            .unwrap();
        let copy = dir.path().join("export.db");
        db.save(Some(&copy)).unwrap();
        db.close().unwrap();

        let mut exported = Db::open(&copy, &schema, DbOptions::new()).unwrap();
        assert!(exported
            .get(Some("User"), json!({"id": "u1"}), &Params::new())
            .unwrap()
            .is_some());
    }

    #[test]
    fn oversize_items_are_rejected() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let huge = "x".repeat(MAX_ITEM);
        let result = db.create(
            Some("User"),
            json!({"id": "u1", "username": huge}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::WontFit { .. })));

        let long_key = "k".repeat(MAX_KEY + 1);
        let result = db.create(
            Some("User"),
            json!({"id": long_key, "username": "a"}),
            &Params::new(),
        );
        assert!(matches!(result, Err(DbError::BadArgs(_))));
    }

    #[test]
    fn unknown_index_is_rejected() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let mut params = Params::new();
        params.index = Some("gsi1".into());
        let result = db.find(Some("User"), Value::Null, &params);
        assert!(matches!(result, Err(DbError::BadArgs(_))));
    }

    #[test]
    fn unknown_model_is_rejected() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let result = db.create(Some("Widget"), json!({"id": "w1"}), &Params::new());
        assert!(matches!(result, Err(DbError::BadArgs(_))));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let (_dir, db_path, schema) = setup_files();
        let mut db = open_db(&db_path, &schema);

        let result = db.create(Some("User"), json!({"id": "u1"}), &Params::new());
        assert!(matches!(result, Err(DbError::BadArgs(_))));
        assert!(db.last_error().unwrap().contains("username"));
    }

    #[derive(Debug, Clone, PartialEq)]
    enum TimerEvent {
        Schedule(u64),
        Cancel,
    }

    struct RecordingTimer(Rc<RefCell<Vec<TimerEvent>>>);

    impl CommitTimer for RecordingTimer {
        fn schedule(&mut self, deadline: u64) {
            self.0.borrow_mut().push(TimerEvent::Schedule(deadline));
        }
        fn cancel(&mut self) {
            self.0.borrow_mut().push(TimerEvent::Cancel);
        }
    }

    #[test]
    fn timer_seam_tracks_deadlines() {
        let (_dir, db_path, schema) = setup_files();
        let events: Rc<RefCell<Vec<TimerEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let mut db = Db::open(
            &db_path,
            &schema,
            DbOptions::new().timer(RecordingTimer(events.clone())),
        )
        .unwrap();

        db.create(
            Some("User"),
            json!({"id": "u1", "username": "a"}),
            &Params::new().with_persist(Persistence::Deferred(5_000)),
        )
        .unwrap();
        assert!(matches!(
            events.borrow().last(),
            Some(TimerEvent::Schedule(_))
        ));

        // Committing everything clears the deadline.
        db.save(None).unwrap();
        assert_eq!(events.borrow().last(), Some(&TimerEvent::Cancel));
        assert_eq!(db.next_due(), None);
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(16))]

            /// Concatenated pages equal one unlimited scan, whatever the
            /// page size and item count.
            #[test]
            fn prop_pagination_equals_single_scan(
                count in 1usize..40,
                page_size in 1usize..12,
            ) {
                let (_dir, db_path, schema) = setup_files();
                let mut db = open_db(&db_path, &schema);

                for n in 0..count {
                    db.create(
                        Some("Item"),
                        json!({"id": format!("{n:03}"), "seq": n}),
                        &Params::new(),
                    )
                    .unwrap();
                }

                let all: Vec<String> = db
                    .find(Some("Item"), Value::Null, &Params::new())
                    .unwrap()
                    .iter()
                    .map(|i| i.key().to_string())
                    .collect();
                prop_assert_eq!(all.len(), count);

                let mut paged = Vec::new();
                let mut cursor: Option<String> = None;
                loop {
                    let mut params = Params::new().with_limit(page_size);
                    if let Some(next) = &cursor {
                        params = params.with_next(next.clone());
                    }
                    let page = db.find(Some("Item"), Value::Null, &params).unwrap();
                    if page.is_empty() {
                        break;
                    }
                    cursor = page.last().map(|i| i.key().to_string());
                    paged.extend(page.iter().map(|i| i.key().to_string()));
                }
                prop_assert_eq!(paged, all);
            }
        }
    }
}
