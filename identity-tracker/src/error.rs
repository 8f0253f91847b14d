//! Error types for identity-tracker

use thiserror::Error;

/// Errors that can occur while tracking identities across stores
#[derive(Debug, Error)]
pub enum TrackerError {
    /// External id or vector id is already mapped
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Mapping, vector or node is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// A backing store is unreachable or closed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Some items of a reconciliation batch failed; the batch continued
    #[error("Partial sync failure: {failed} of {total} items failed")]
    PartialSyncFailure { failed: usize, total: usize },

    /// Metadata or ids fail shape checks
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// Missing or unusable configuration at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// RocksDB error
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    /// Serialization error (bincode)
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrackerError {
    /// Create an already-exists error
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create an integrity violation
    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors collected while closing every store of a service
#[derive(Debug, Error)]
#[error("{} component(s) failed to close: {}", failures.len(), summary(failures))]
pub struct CloseError {
    pub failures: Vec<(&'static str, TrackerError)>,
}

fn summary(failures: &[(&'static str, TrackerError)]) -> String {
    failures
        .iter()
        .map(|(component, err)| format!("{}: {}", component, err))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_already_exists() {
        let err = TrackerError::already_exists("external id 'user_1'");
        assert_eq!(err.to_string(), "Already exists: external id 'user_1'");
        assert!(err.is_already_exists());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_display_partial_sync_failure() {
        let err = TrackerError::PartialSyncFailure { failed: 2, total: 7 };
        assert_eq!(
            err.to_string(),
            "Partial sync failure: 2 of 7 items failed"
        );
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TrackerError = json_err.into();
        match err {
            TrackerError::Json(_) => {}
            _ => panic!("Expected TrackerError::Json"),
        }
    }

    #[test]
    fn test_close_error_lists_every_component() {
        let err = CloseError {
            failures: vec![
                ("vector index", TrackerError::connection("timeout")),
                ("graph store", TrackerError::connection("refused")),
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 component(s) failed to close"));
        assert!(msg.contains("vector index: Connection error: timeout"));
        assert!(msg.contains("graph store: Connection error: refused"));
    }
}
