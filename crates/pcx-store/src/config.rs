use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for an [`InMemoryDataStore`](crate::InMemoryDataStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// First key each entity's sequence hands out.
    pub first_key: i64,
    /// Increment between generated keys. Must be positive.
    pub key_step: i64,
    /// Publish a channel `Committed` event after every applied flush.
    pub publish_events: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            first_key: 1,
            key_step: 1,
            publish_events: true,
        }
    }
}

impl StoreConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.key_step <= 0 {
            return Err(StoreError::Config(format!(
                "key_step must be positive, got {}",
                self.key_step
            )));
        }
        Ok(())
    }
}
