//! Identity Daemon Library
//!
//! Loads configuration, resolves store locations and runs background
//! reconciliation for an identity-tracker service until interrupted.

pub mod daemon;
pub mod error;
pub mod settings;

pub use daemon::Daemon;
pub use error::DaemonError;
pub use settings::{LayeredSecrets, Overrides};
