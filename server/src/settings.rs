//! Configuration and secret resolution for the daemon.
//!
//! Values come from, in order of precedence: command-line overrides, the
//! JSON config file, then built-in defaults. Store locations are secrets:
//! `--data-dir` pins them, otherwise `IDENTITY_TRACKER_*` variables apply.

use identity_tracker::{EnvSecrets, Result, SecretProvider, StaticSecrets, TrackerConfig};
use std::path::PathBuf;

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub sync_interval_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
    pub vector_dimension: Option<usize>,
}

impl Overrides {
    /// Build the effective tracker configuration.
    pub fn load_config(&self) -> Result<TrackerConfig> {
        let mut config = match &self.config {
            Some(path) => TrackerConfig::from_file(path)?,
            None => TrackerConfig::default(),
        };

        if let Some(secs) = self.sync_interval_secs {
            config.sync_interval_secs = secs;
        }
        if let Some(secs) = self.cleanup_interval_secs {
            config.cleanup_interval_secs = secs;
        }
        if let Some(dimension) = self.vector_dimension {
            config.vector_dimension = dimension;
        }

        config.validate()?;
        Ok(config)
    }

    /// Secrets for `config`, with `--data-dir` locations ahead of the environment.
    pub fn secrets(&self, config: &TrackerConfig) -> LayeredSecrets {
        let mut pinned = StaticSecrets::new();
        if let Some(dir) = &self.data_dir {
            pinned.insert(
                config.relational_path_key.clone(),
                dir.join("mappings").to_string_lossy(),
            );
            pinned.insert(
                config.vector_path_key.clone(),
                dir.join("vectors").to_string_lossy(),
            );
        }
        LayeredSecrets::new(vec![Box::new(pinned), Box::new(EnvSecrets)])
    }
}

/// Consults each provider in turn; the first non-empty value wins.
pub struct LayeredSecrets {
    layers: Vec<Box<dyn SecretProvider>>,
}

impl LayeredSecrets {
    pub fn new(layers: Vec<Box<dyn SecretProvider>>) -> Self {
        Self { layers }
    }
}

impl SecretProvider for LayeredSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.lookup(key).filter(|v| !v.is_empty()))
    }
}
