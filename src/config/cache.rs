use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Hard ceiling on the number of cached keys
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Default time-to-live of an entry (unit: milliseconds)
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Interval of the background purge of expired entries (unit: milliseconds)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_size: default_cache_size(),
            ttl_ms: default_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache.cache_size must be greater than 0".into(),
            )));
        }
        if self.sweep_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "cache.sweep_interval_ms cannot be 0".into(),
            )));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

fn default_cache_size() -> usize {
    10_000
}
fn default_ttl_ms() -> u64 {
    300_000
}
fn default_sweep_interval_ms() -> u64 {
    60_000
}
