//! Error types for the nestdb engine.

use std::io;
use thiserror::Error;

/// All possible errors from the database engine.
#[derive(Debug, Error)]
pub enum DbError {
    /// Missing or malformed inputs: unknown model, incomplete sort key,
    /// enum violation, type-mapping failure.
    #[error("bad args: {0}")]
    BadArgs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Exists(String),

    /// setField on a missing item without upsert.
    #[error("not ready: {0}")]
    NotReady(String),

    #[error("cannot open {path}: {source}")]
    CantOpen {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot read {path}: {source}")]
    CantRead {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {path}: {source}")]
    CantWrite {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Corrupt snapshot or journal record, wrong format version.
    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("bad state: {0}")]
    BadState(String),

    /// Item exceeds the serialized size limit.
    #[error("item too large: {size} bytes (limit {limit})")]
    WontFit { size: usize, limit: usize },

    #[error("schema error: {0}")]
    Schema(String),
}

impl DbError {
    /// Short machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            DbError::BadArgs(_) => "badArgs",
            DbError::NotFound(_) => "notFound",
            DbError::Exists(_) => "exists",
            DbError::NotReady(_) => "notReady",
            DbError::CantOpen { .. } => "cantOpen",
            DbError::CantRead { .. } => "cantRead",
            DbError::CantWrite { .. } => "cantWrite",
            DbError::BadFormat(_) => "badFormat",
            DbError::BadState(_) => "badState",
            DbError::WontFit { .. } => "wontFit",
            DbError::Schema(_) => "schema",
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DbError::NotFound("User".into());
        assert_eq!(err.to_string(), "not found: User");

        let err = DbError::WontFit {
            size: 300_000,
            limit: 262_144,
        };
        assert_eq!(
            err.to_string(),
            "item too large: 300000 bytes (limit 262144)"
        );
        assert_eq!(err.code(), "wontFit");
    }

    #[test]
    fn io_source_is_preserved() {
        let err = DbError::CantOpen {
            path: "/tmp/state.db".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().starts_with("cannot open /tmp/state.db"));
        assert_eq!(err.code(), "cantOpen");
    }
}
