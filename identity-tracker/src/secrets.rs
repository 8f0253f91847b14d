//! Credential and connection-string lookup
//!
//! Secrets are resolved once at startup; a missing key aborts construction
//! with a `Config` error.

use std::collections::HashMap;

use crate::error::{Result, TrackerError};

/// Prefix for environment-backed secrets
pub const ENV_PREFIX: &str = "IDENTITY_TRACKER_";

/// Source of named secrets
pub trait SecretProvider: Send + Sync {
    /// Value for `key`, or `None` if unset
    fn lookup(&self, key: &str) -> Option<String>;

    /// Value for `key`, failing with `Config` if unset
    fn get(&self, key: &str) -> Result<String> {
        self.lookup(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TrackerError::config(format!("missing secret '{}'", key)))
    }
}

/// Reads `IDENTITY_TRACKER_<KEY>` environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

impl EnvSecrets {
    pub fn var_name(key: &str) -> String {
        format!("{}{}", ENV_PREFIX, key.to_ascii_uppercase())
    }
}

impl SecretProvider for EnvSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(Self::var_name(key)).ok()
    }
}

/// Fixed in-memory secrets
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

impl SecretProvider for StaticSecrets {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
