//! Error types for the migration engine
//!
//! Provides error handling for:
//! - Transport failures against the store
//! - Codec failures (decode / encode / key derivation)
//! - Canonical write path rejections
//! - Per-task failures collected by a phase
//! - Run-level failures and configuration errors
//! - Snapshot file I/O

use crate::report::Phase;
use crate::types::{EntityId, TableName, UniqueKey};
use std::path::PathBuf;

/// Store call that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Paginated scan
    Scan,
    /// Point lookup by unique key
    Lookup,
    /// Direct put into a table
    Put,
}

impl std::fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Scan => "scan",
            Self::Lookup => "lookup",
            Self::Put => "put",
        };
        f.write_str(name)
    }
}

/// Errors raised by a key-value store client
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The call did not complete
    #[error("{operation} on table '{table}' failed: {message}")]
    Transport {
        /// Failed operation
        operation: StoreOperation,
        /// Table addressed by the call
        table: TableName,
        /// Client-provided detail
        message: String,
    },

    /// Table does not exist
    #[error("table not found: {0}")]
    TableNotFound(TableName),

    /// Continuation token could not be interpreted
    #[error("invalid continuation token: {0}")]
    InvalidContinuation(String),
}

impl StoreError {
    /// Create a transport error
    pub fn transport(
        operation: StoreOperation,
        table: impl Into<TableName>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation,
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by a record codec
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Payload could not be decoded
    #[error("decode failed: {0}")]
    Decode(String),

    /// Entity could not be encoded
    #[error("encode failed: {0}")]
    Encode(String),

    /// Entity lacks an attribute the key schema requires
    #[error("entity {entity} has no value for key attribute '{attribute}'")]
    MissingKeyAttribute {
        /// Entity being keyed
        entity: EntityId,
        /// Attribute that was absent
        attribute: String,
    },
}

/// Errors raised by the canonical write path
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Underlying store call failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Entity could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// More than one record resolves to the key
    #[error("{count} records resolve to unique key '{key}'")]
    AmbiguousUniqueMatch {
        /// Contested key
        key: UniqueKey,
        /// Number of records found
        count: usize,
    },

    /// The path's own consistency checks refused the write
    #[error("write to '{key}' rejected: {reason}")]
    Rejected {
        /// Key being written
        key: UniqueKey,
        /// Why the write was refused
        reason: String,
    },
}

/// Failure of a single per-record task inside a phase
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// A store call failed
    #[error("transport failure: {0}")]
    Transport(#[from] StoreError),

    /// Pre-existing data-integrity violation in the unique index
    #[error("ambiguous unique match: {count} records at key '{key}'")]
    AmbiguousUniqueMatch {
        /// Contested key
        key: UniqueKey,
        /// Number of records found
        count: usize,
    },

    /// Record could not be decoded or re-encoded
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// Canonical write path refused a forced write
    #[error("canonical write rejected for key '{key}': {reason}")]
    WriteRejected {
        /// Key being written
        key: UniqueKey,
        /// Why the write was refused
        reason: String,
    },
}

impl TaskError {
    /// Whether the failure belongs to the transport class
    ///
    /// Transport-class failures are resolved by re-running the migration.
    #[inline]
    #[must_use]
    pub fn is_transport_class(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::WriteRejected { .. })
    }

    /// Whether the failure signals corrupt source data
    #[inline]
    #[must_use]
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::AmbiguousUniqueMatch { .. })
    }
}

impl From<WriteError> for TaskError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::Store(e) => Self::Transport(e),
            WriteError::Codec(e) => Self::Codec(e),
            WriteError::AmbiguousUniqueMatch { key, count } => {
                Self::AmbiguousUniqueMatch { key, count }
            }
            WriteError::Rejected { key, reason } => Self::WriteRejected { key, reason },
        }
    }
}

/// A failed task together with where it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    /// Phase the task belonged to
    pub phase: Phase,
    /// Stored key of the record the task owned
    pub key: UniqueKey,
    /// Entity, when the record decoded far enough to know it
    pub entity: Option<EntityId>,
    /// What went wrong
    pub error: TaskError,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.entity {
            Some(id) => write!(f, "[{}] {} (entity {}): {}", self.phase, self.key, id, self.error),
            None => write!(f, "[{}] {}: {}", self.phase, self.key, self.error),
        }
    }
}

/// Errors that abort a whole migration run
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Phase 1 could not read the full record set
    #[error("scan of table '{table}' failed: {source}")]
    ScanFailed {
        /// Source table
        table: TableName,
        /// Underlying store failure
        #[source]
        source: StoreError,
    },

    /// Configuration rejected before the run started
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

/// Snapshot I/O errors
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// File could not be read or written
    #[error("io error on {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// File contents are not a snapshot
    #[error("malformed snapshot {path}: {message}")]
    Format {
        /// File path
        path: PathBuf,
        /// Parser detail
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::transport(StoreOperation::Scan, "users", "connection reset");
        assert_eq!(err.to_string(), "scan on table 'users' failed: connection reset");
    }

    #[test]
    fn write_error_maps_into_task_error() {
        let rejected = TaskError::from(WriteError::Rejected {
            key: UniqueKey::from("k"),
            reason: "stale".to_string(),
        });
        assert!(rejected.is_transport_class());
        assert!(!rejected.is_integrity_violation());

        let ambiguous = TaskError::from(WriteError::AmbiguousUniqueMatch {
            key: UniqueKey::from("k"),
            count: 2,
        });
        assert!(ambiguous.is_integrity_violation());
        assert!(!ambiguous.is_transport_class());
    }

    #[test]
    fn task_failure_display_includes_phase_and_key() {
        let failure = TaskFailure {
            phase: Phase::Reconcile,
            key: UniqueKey::from("alice"),
            entity: None,
            error: TaskError::Codec(CodecError::Decode("bad json".to_string())),
        };
        let text = failure.to_string();
        assert!(text.contains("reconcile"));
        assert!(text.contains("alice"));
        assert!(text.contains("bad json"));
    }

    #[test]
    fn snapshot_error_names_the_file() {
        let err = SnapshotError::Format {
            path: PathBuf::from("/tmp/store.json"),
            message: "expected value".to_string(),
        };
        assert_eq!(err.to_string(), "malformed snapshot /tmp/store.json: expected value");
    }
}
