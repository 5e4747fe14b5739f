//! Schema definition and loading.
//!
//! Schemas are JSON5 documents describing models, their fields and the
//! primary index. A schema is parsed once at open, optional `blend`
//! fragments are merged in, and the result is frozen for the lifetime of
//! the database.

use crate::error::{DbError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Default name of the hidden type-discriminator field.
pub const TYPE_FIELD: &str = "_type";

/// Default primary index field names, kept for cloud-side compatibility.
const DEFAULT_HASH: &str = "pk";
const DEFAULT_SORT: &str = "sk";

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::Object => write!(f, "object"),
            FieldType::Array => write!(f, "array"),
        }
    }
}

/// Definition of a field in a model.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldDef {
    /// Declared type. Absent means the field is accepted untyped.
    #[serde(rename = "type")]
    pub field_type: Option<FieldType>,
    /// Whether the field must be present on create.
    pub required: bool,
    /// Default applied on create when the field is missing.
    pub default: Option<Value>,
    /// `${name}` template rendered against the other properties.
    pub value: Option<String>,
    /// Identifier generation: `ulid`, `uid` or `uid(N)`.
    pub generate: Option<String>,
    /// Permitted values.
    #[serde(rename = "enum")]
    pub allowed: Option<Vec<String>>,
    /// This field holds the item's expiry as an ISO-8601 date.
    pub ttl: bool,
    /// Hidden fields are populated internally (the type field).
    pub hidden: bool,
    /// Accepted for cloud-side compatibility, not enforced on-device.
    pub unique: bool,
    /// Accepted for cloud-side compatibility, not enforced on-device.
    pub crypt: bool,
}

/// Cloud-sync direction for a model. The device engine records it for
/// subscribers; it does not change local persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    None,
    Up,
    Down,
    Both,
}

/// A named entity type: its fields and persistence behavior.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub fields: BTreeMap<String, FieldDef>,
    pub sync: SyncMode,
    /// Keep items of this model in memory only (never journaled).
    pub mem: bool,
    /// Default commit delay in milliseconds. 0 commits immediately.
    pub delay: u64,
    /// Name of the field carrying the item expiry, if any.
    pub ttl_field: Option<String>,
}

impl Model {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SchemaParams {
    timestamps: bool,
    type_field: String,
}

impl Default for SchemaParams {
    fn default() -> Self {
        Self {
            timestamps: false,
            type_field: TYPE_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct IndexDef {
    hash: Option<String>,
    sort: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ProcessDef {
    enable: Option<String>,
    sync: Option<SyncMode>,
    mem: Option<bool>,
    /// Seconds between a mutation and its journal commit.
    delay: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct SchemaFile {
    params: Option<SchemaParams>,
    indexes: BTreeMap<String, IndexDef>,
    models: BTreeMap<String, BTreeMap<String, FieldDef>>,
    process: BTreeMap<String, ProcessDef>,
    blend: Vec<String>,
}

/// A frozen schema: models, primary index field names and global params.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Auto-populate `created`/`updated` fields.
    pub timestamps: bool,
    /// Name of the type-discriminator field.
    pub type_field: String,
    /// Primary index sort field: its value is the item key.
    pub sort_field: String,
    /// Primary index hash field: accepted in properties, never indexed.
    pub hash_field: String,
    models: BTreeMap<String, Model>,
}

impl Schema {
    /// Load a JSON5 schema file, applying any `blend` fragments relative
    /// to the schema's directory.
    pub fn load(path: &Path) -> Result<Schema> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let root = read_json5(path)?;
        Self::from_value(root, dir)
    }

    /// Build a schema from an already-parsed JSON tree.
    pub fn from_value(mut root: Value, dir: &Path) -> Result<Schema> {
        if !root.is_object() {
            return Err(DbError::Schema("schema must be an object".into()));
        }

        // Merge blended fragments before interpreting any section.
        let blends = root
            .get("blend")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .unwrap_or_else(|| Some(Vec::new()))
            .ok_or_else(|| DbError::Schema("blend entries must be strings".into()))?;
        for entry in blends {
            let fragment = read_json5(&dir.join(&entry))?;
            merge(&mut root, fragment);
        }

        let file: SchemaFile = serde_json::from_value(root)
            .map_err(|e| DbError::Schema(format!("invalid schema: {e}")))?;

        let params = file.params.unwrap_or_default();
        let primary = file.indexes.get("primary").cloned().unwrap_or_default();
        let sort_field = primary.sort.unwrap_or_else(|| DEFAULT_SORT.to_string());
        let hash_field = primary.hash.unwrap_or_else(|| DEFAULT_HASH.to_string());

        let mut models = BTreeMap::new();
        for (name, mut fields) in file.models {
            let process = file.process.get(&name).cloned().unwrap_or_default();
            if process.enable.as_deref() == Some("cloud") {
                tracing::debug!(model = %name, "skipping cloud-only model");
                continue;
            }

            // Every model carries the hidden type discriminator.
            fields.entry(params.type_field.clone()).or_insert(FieldDef {
                field_type: Some(FieldType::String),
                hidden: true,
                ..FieldDef::default()
            });

            let ttl_field = fields
                .iter()
                .find(|(_, def)| def.ttl)
                .map(|(name, _)| name.clone());

            models.insert(
                name.clone(),
                Model {
                    name,
                    fields,
                    sync: process.sync.unwrap_or_default(),
                    mem: process.mem.unwrap_or(false),
                    delay: process.delay.unwrap_or(0) * 1000,
                    ttl_field,
                },
            );
        }

        Ok(Schema {
            timestamps: params.timestamps,
            type_field: params.type_field,
            sort_field,
            hash_field,
            models,
        })
    }

    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    /// Iterate all device-visible models.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }
}

fn read_json5(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| DbError::CantRead {
        path: path.display().to_string(),
        source: e,
    })?;
    json5::from_str(&text)
        .map_err(|e| DbError::Schema(format!("{}: {e}", path.display())))
}

/// Deep-merge `overlay` into `base`. Objects merge recursively; any other
/// value in the overlay replaces the base value.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
