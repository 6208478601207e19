//! Error types for the record store.

use crate::schema::{SchemaCompatibility, SchemaVersion};
use crate::types::{Record, RecordId};
use std::fmt;
use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Record not found: {0}")]
    NotFound(RecordId),

    #[error("Record already exists: {0}")]
    AlreadyExists(RecordId),

    #[error("Migration failed: {0}")]
    Migration(#[from] MigrationFailure),

    #[error("Conflict: {0}")]
    Conflict(Box<ConflictError>),

    #[error("Dangling reference: {record}.{field} points at missing {target}")]
    DanglingReference {
        record: RecordId,
        field: String,
        target: RecordId,
    },

    #[error("Unknown record type: {0}")]
    UnknownType(String),

    #[error("Record type registered twice: {0}")]
    DuplicateType(String),

    #[error("Incompatible schema ({compatibility:?}): local {local:?}, remote {remote:?}")]
    IncompatibleSchema {
        compatibility: SchemaCompatibility,
        local: SchemaVersion,
        remote: SchemaVersion,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Transaction aborted: {0}")]
    Aborted(String),
}

impl From<ConflictError> for StoreError {
    fn from(e: ConflictError) -> Self {
        StoreError::Conflict(Box::new(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// A record failed its kind's validator.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub struct ValidationError {
    /// Offending record, filled in by the store when known.
    pub record_id: Option<RecordId>,
    /// Dotted path of the violated field (`""` for the record itself).
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record_id: None,
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach the record id.
    pub fn for_record(mut self, id: &RecordId) -> Self {
        self.record_id = Some(id.clone());
        self
    }

    /// Prefix the path with a parent field name.
    pub fn nested(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else if self.path.starts_with('[') {
            format!("{}{}", parent, self.path)
        } else {
            format!("{}.{}", parent, self.path)
        };
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record_id {
            Some(id) => write!(f, "{} at '{}': {}", id, self.path, self.reason),
            None => write!(f, "at '{}': {}", self.path, self.reason),
        }
    }
}

/// Why a migration could not be performed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationFailureReason {
    /// A step between `from` and `to` is not registered.
    NoPathFound { from: u32, to: u32, missing: u32 },
    /// The record kind is not part of the schema.
    UnknownKind(String),
    /// The data claims a version newer than the schema knows.
    VersionTooNew { version: u32, current: u32 },
    /// The data predates the oldest version the chain starts from.
    VersionTooOld { version: u32, first: u32 },
    /// A migration function failed or broke the record's identity.
    MigrationError { version: u32, message: String },
}

impl fmt::Display for MigrationFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationFailureReason::NoPathFound { from, to, missing } => {
                write!(f, "no migration path from v{} to v{} (missing v{})", from, to, missing)
            }
            MigrationFailureReason::UnknownKind(kind) => write!(f, "unknown kind '{}'", kind),
            MigrationFailureReason::VersionTooNew { version, current } => {
                write!(f, "version {} is newer than current {}", version, current)
            }
            MigrationFailureReason::VersionTooOld { version, first } => {
                write!(f, "version {} is older than first supported {}", version, first)
            }
            MigrationFailureReason::MigrationError { version, message } => {
                write!(f, "step v{} failed: {}", version, message)
            }
        }
    }
}

/// A failed record or store migration.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{target}: {reason}")]
pub struct MigrationFailure {
    /// Kind name, or `"store"` for store-level migrations.
    pub target: String,
    pub record_id: Option<RecordId>,
    pub reason: MigrationFailureReason,
}

impl MigrationFailure {
    pub fn new(target: impl Into<String>, reason: MigrationFailureReason) -> Self {
        Self {
            target: target.into(),
            record_id: None,
            reason,
        }
    }

    pub fn for_record(mut self, id: &RecordId) -> Self {
        self.record_id = Some(id.clone());
        self
    }
}

/// An applied diff expected a different current state.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("record {id}: expected {}, found {}", describe(.expected), describe(.actual))]
pub struct ConflictError {
    pub id: RecordId,
    /// What the diff assumed the record to be (`None` = absent).
    pub expected: Option<Record>,
    /// What the store actually holds (`None` = absent).
    pub actual: Option<Record>,
}

fn describe(record: &Option<Record>) -> &'static str {
    if record.is_some() {
        "a different value"
    } else {
        "no record"
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_paths() {
        let err = ValidationError::new("x", "expected a number").nested("camera");
        assert_eq!(err.path, "camera.x");

        let err = ValidationError::new("[2]", "expected a string").nested("selectedIds");
        assert_eq!(err.path, "selectedIds[2]");

        let err = ValidationError::new("", "bad").nested("color");
        assert_eq!(err.path, "color");

        let err = err.for_record(&RecordId::new("shape", "a"));
        assert_eq!(err.to_string(), "shape:a at 'color': bad");
    }

    #[test]
    fn test_conflict_converts_boxed() {
        let conflict = ConflictError {
            id: RecordId::new("shape", "c"),
            expected: None,
            actual: None,
        };
        let err: StoreError = conflict.into();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
