//! Error types for the sync engine.

use crate::models::conflict::RollbackConflict;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sync engine.
#[derive(Error, Debug)]
pub enum Error {
    // Rollback point errors
    #[error("Rollback point not found: {0}")]
    RollbackNotFound(String),

    #[error("Invalid rollback point id: {0:?}")]
    InvalidPointId(String),

    #[error("Rollback point {id} expired at {expired_at}")]
    RollbackExpired { id: String, expired_at: String },

    #[error("Rollback aborted by {} conflict(s) in operation {operation_id}", conflicts.len())]
    RollbackConflict {
        operation_id: String,
        conflicts: Vec<RollbackConflict>,
    },

    #[error("Rollback operation {operation_id} failed: {reason}")]
    RollbackFailed { operation_id: String, reason: String },

    #[error("Rollback operation not found: {0}")]
    OperationNotFound(String),

    #[error("Invalid operation transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Snapshot {snapshot_id} failed integrity check: {reason}")]
    Integrity { snapshot_id: String, reason: String },

    // Capture errors
    #[error("Snapshot capture failed: {0}")]
    CaptureFailed(String),

    // Mutual exclusion
    #[error("Already active: {0}")]
    AlreadyActive(String),

    // Store adapter errors
    #[error("Database not ready: {0}")]
    DatabaseNotReady(String),

    #[error("No store adapter registered for {0}")]
    NoAdapter(String),

    #[error("Read from {store} failed for {path}: {reason}")]
    StoreRead {
        store: String,
        path: String,
        reason: String,
    },

    #[error("Write to {store} failed for {path}: {reason}")]
    StoreWrite {
        store: String,
        path: String,
        reason: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported persistence backend: {0}")]
    UnsupportedBackend(String),

    // Sync errors
    #[error("Sync pass failed: {cause}; rollback also failed: {rollback}")]
    SyncFailed { cause: String, rollback: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // TOML errors
    #[error("TOML error: {0}")]
    TomlDe(#[from] toml::de::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Whether the coordinator may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreWrite { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_store_writes_are_retryable() {
        let write = Error::StoreWrite {
            store: "graph".to_string(),
            path: "E".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(write.is_retryable());
        assert!(!Error::DatabaseNotReady("graph".to_string()).is_retryable());
        assert!(!Error::RollbackNotFound("rp".to_string()).is_retryable());
    }

    #[test]
    fn test_conflict_error_message_counts_conflicts() {
        let err = Error::RollbackConflict {
            operation_id: "op-1".to_string(),
            conflicts: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            "Rollback aborted by 0 conflict(s) in operation op-1"
        );
    }
}
