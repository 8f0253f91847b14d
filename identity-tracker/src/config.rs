//! Tracker configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::adapter::VectorIdStrategy;
use crate::cache::DEFAULT_CACHE_BYTES;
use crate::error::{Result, TrackerError};
use crate::events::DEFAULT_EVENT_CAPACITY;

/// Configuration for a [`TrackingService`](crate::TrackingService)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between mapping sync cycles (default: 300)
    pub sync_interval_secs: u64,
    /// Seconds between orphan vector cleanups (default: 600)
    pub cleanup_interval_secs: u64,
    /// Shared cache byte budget (default: 200 MiB)
    pub cache_bytes: usize,
    /// Tracking events kept in memory for queries (default: 10000)
    pub event_capacity: usize,
    /// Embedding length accepted by the vector index
    pub vector_dimension: usize,
    /// How vector ids are assigned to new entities
    pub vector_id_strategy: VectorIdStrategy,
    /// Graph labels checked for orphan nodes
    pub graph_labels: Vec<String>,
    /// Secret key naming the relational store location
    pub relational_path_key: String,
    /// Secret key naming the vector index location
    pub vector_path_key: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300,
            cleanup_interval_secs: 600,
            cache_bytes: DEFAULT_CACHE_BYTES,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            vector_dimension: 384,
            vector_id_strategy: VectorIdStrategy::Uuid,
            graph_labels: vec!["BugReport".to_string(), "FeedbackEntry".to_string()],
            relational_path_key: "relational_path".to_string(),
            vector_path_key: "vector_path".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Load a JSON config file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            TrackerError::config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        log::info!("Loaded tracker config from: {}", path.display());
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(TrackerError::config("intervals must be at least one second"));
        }
        if self.event_capacity == 0 {
            return Err(TrackerError::config("event_capacity must be positive"));
        }
        if self.vector_dimension == 0 {
            return Err(TrackerError::config("vector_dimension must be positive"));
        }
        if self.graph_labels.iter().any(|l| l.trim().is_empty()) {
            return Err(TrackerError::config("graph labels must be non-empty"));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
