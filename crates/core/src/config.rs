//! Namespace configuration parsed from `monitors_dir/configs/*.yaml`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Which store backs a namespace.
///
/// The YAML spellings are the historical ones; `cached_pebble_store` kept
/// its name when the backing log changed so existing config files keep
/// working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    #[serde(rename = "memory_store")]
    Memory,
    #[serde(rename = "cached_pebble_store")]
    CachedPersistent,
}

/// One namespace definition: its group, window geometry, monitor cadence,
/// and store kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub group: String,
    pub namespace: String,
    /// Seconds per time bucket.
    pub granularity: i64,
    /// Number of fully-formed historical buckets a window retains.
    pub cardinality: i64,
    /// Monitor cadence in multiples of `granularity`.
    pub snapshot: i64,
    /// Whether snapshots include the current, partially-filled bucket.
    #[serde(default)]
    pub current: bool,
    pub store_type: StoreKind,
}

impl NamespaceConfig {
    /// Parse and validate a single YAML config document.
    pub fn from_yaml(buf: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(buf)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Invalid("namespace name is empty".into()));
        }
        if self.granularity < 1 {
            return Err(ConfigError::Invalid(format!(
                "{}: granularity must be >= 1, got {}",
                self.namespace, self.granularity
            )));
        }
        if self.cardinality < 1 {
            return Err(ConfigError::Invalid(format!(
                "{}: cardinality must be >= 1, got {}",
                self.namespace, self.cardinality
            )));
        }
        if self.snapshot < 1 {
            return Err(ConfigError::Invalid(format!(
                "{}: snapshot must be >= 1, got {}",
                self.namespace, self.snapshot
            )));
        }
        Ok(())
    }
}
