//! Error types for the identity daemon.

use identity_tracker::{CloseError, TrackerError};
use thiserror::Error;

/// Errors that end the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Shutdown error: {0}")]
    Close(#[from] CloseError),

    #[error("Signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

impl DaemonError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Tracker(TrackerError::Config(_)) => 78,
            Self::Close(_) => 74,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_exit_with_config_code() {
        let err = DaemonError::from(TrackerError::config("missing secret 'vector_path'"));
        assert_eq!(err.exit_code(), 78);
        assert_eq!(
            err.to_string(),
            "Tracker error: Configuration error: missing secret 'vector_path'"
        );
    }

    #[test]
    fn test_other_errors_exit_with_one() {
        let err = DaemonError::from(TrackerError::connection("down"));
        assert_eq!(err.exit_code(), 1);
    }
}
