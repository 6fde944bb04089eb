//! Container tuning settings

use crate::error::ContainerError;
use serde::{Deserialize, Serialize};

/// Container settings, normally loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub growth: GrowthSettings,
    pub deque: DequeSettings,
    pub hash_map: HashMapSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowthSettings {
    /// Capacity multiplier applied when a growable container fills up.
    pub factor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DequeSettings {
    /// Target size of one deque block in bytes.
    pub block_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashMapSettings {
    pub initial_buckets: usize,
}

impl Settings {
    pub const MIN_GROWTH_FACTOR: usize = 2;
    pub const MIN_BLOCK_BYTES: usize = 128;

    /// Parse settings from JSON and validate them.
    pub fn from_json(text: &str) -> Result<Self, ContainerError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ContainerError> {
        if self.growth.factor < Self::MIN_GROWTH_FACTOR {
            return Err(ContainerError::InvalidSettings(format!(
                "growth.factor must be at least {}, got {}",
                Self::MIN_GROWTH_FACTOR,
                self.growth.factor
            )));
        }
        if self.deque.block_bytes < Self::MIN_BLOCK_BYTES {
            return Err(ContainerError::InvalidSettings(format!(
                "deque.block_bytes must be at least {}, got {}",
                Self::MIN_BLOCK_BYTES,
                self.deque.block_bytes
            )));
        }
        if self.hash_map.initial_buckets == 0 {
            return Err(ContainerError::InvalidSettings(
                "hash_map.initial_buckets must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            growth: GrowthSettings::default(),
            deque: DequeSettings::default(),
            hash_map: HashMapSettings::default(),
        }
    }
}

impl Default for GrowthSettings {
    fn default() -> Self {
        Self { factor: 2 }
    }
}

impl Default for DequeSettings {
    fn default() -> Self {
        Self { block_bytes: 32 * 1024 }
    }
}

impl Default for HashMapSettings {
    fn default() -> Self {
        Self { initial_buckets: 32 }
    }
}
