//! # nestdb
//!
//! An embedded, schema-validated JSON document database for device
//! agents: a single-file store with an ordered primary index,
//! write-ahead journaling with crash recovery, TTL expiry, delayed and
//! batched commits, change triggers and pagination.
//!
//! ## Design Principles
//!
//! - **Single writer**: one process, one thread; operations never
//!   interleave and the files are owned exclusively
//! - **Durable by default**: an immediate mutation is journaled, flushed
//!   and fsynced before the call returns
//! - **Schema first**: a frozen JSON5 schema validates every mutation,
//!   applies defaults, generates identifiers and renders key templates
//! - **No runtime**: timers are a seam ([`CommitTimer`]); the embedding
//!   event loop calls [`Db::service`] when a deadline fires
//!
//! ## Core Concepts
//!
//! ### Models and items
//!
//! A schema declares models; each item is a JSON document keyed by the
//! value of the primary index's sort field. A hidden type field ties an
//! item to its model.
//!
//! ### Journal and snapshot
//!
//! Every non-in-memory mutation appends one record to `<path>.jnl`.
//! When the journal grows too large or too old, the whole store is
//! rewritten to `<path>` (via `<path>.save` and an atomic rename) and
//! the journal is truncated. Opening a database loads the snapshot and
//! replays the journal.
//!
//! ### Delayed commits
//!
//! A model (or a call) may defer its journal write. Pending changes
//! coalesce per item and commit from a single timer, trading durability
//! for flash wear on write-heavy telemetry.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nestdb::{Db, DbOptions, Params};
//! use serde_json::json;
//!
//! # fn main() -> nestdb::Result<()> {
//! let mut db = Db::open("state.db", "schema.json5", DbOptions::new())?;
//!
//! let user = db.create(
//!     Some("User"),
//!     json!({"username": "admin", "email": "admin@example.com", "role": "admin"}),
//!     &Params::new(),
//! )?;
//!
//! let found = db.get(Some("User"), json!({"id": user.field_str("id")}), &Params::new())?;
//! assert!(found.is_some());
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod commit;
pub mod db;
pub mod error;
pub mod ident;
pub mod item;
pub mod journal;
pub mod query;
pub mod schema;
pub mod store;
pub mod trigger;

// Re-export main types at crate root
pub use commit::{CommitTimer, Persistence};
pub use db::{Db, DbOptions, DEFAULT_MAX_JOURNAL_AGE, DEFAULT_MAX_JOURNAL_SIZE};
pub use error::{DbError, Result};
pub use item::Item;
pub use query::Params;
pub use schema::{FieldDef, FieldType, Model, Schema, SyncMode};
pub use store::{MAX_ITEM, MAX_KEY};
pub use trigger::{CallbackId, Cmd, Events, TriggerCtx};

/// Type aliases for clarity
pub type ModelName = String;
pub type SortKey = String;
