use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::MIN_POLLING_INTERVAL_MS;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PollerConfig {
    /// Tick period of the shared scheduling loop (unit: milliseconds, minimum 100)
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Maximum number of concurrent storage reads within one tick
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Safety-net poll period for keys served by a live push channel (unit: milliseconds)
    #[serde(default = "default_push_safety_poll_interval_ms")]
    pub push_safety_poll_interval_ms: u64,

    /// A storage timestamp must exceed the cached one by more than this to count as a change
    /// on its own; otherwise value equality decides (unit: milliseconds)
    #[serde(default = "default_clock_skew_tolerance_ms")]
    pub clock_skew_tolerance_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            max_concurrency: default_max_concurrency(),
            push_safety_poll_interval_ms: default_push_safety_poll_interval_ms(),
            clock_skew_tolerance_ms: default_clock_skew_tolerance_ms(),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.polling_interval_ms < MIN_POLLING_INTERVAL_MS {
            return Err(Error::Config(ConfigError::Message(format!(
                "poller.polling_interval_ms must be >= {MIN_POLLING_INTERVAL_MS}ms"
            ))));
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config(ConfigError::Message(
                "poller.max_concurrency must be greater than 0".into(),
            )));
        }
        if self.push_safety_poll_interval_ms < self.polling_interval_ms {
            return Err(Error::Config(ConfigError::Message(
                "poller.push_safety_poll_interval_ms cannot be shorter than poller.polling_interval_ms".into(),
            )));
        }
        Ok(())
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn push_safety_poll_interval(&self) -> Duration {
        Duration::from_millis(self.push_safety_poll_interval_ms)
    }

    pub fn clock_skew_tolerance(&self) -> Duration {
        Duration::from_millis(self.clock_skew_tolerance_ms)
    }
}

fn default_polling_interval_ms() -> u64 {
    2_000
}
fn default_max_concurrency() -> usize {
    16
}
fn default_push_safety_poll_interval_ms() -> u64 {
    10_000
}
fn default_clock_skew_tolerance_ms() -> u64 {
    0
}
