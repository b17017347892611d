use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Parameters of the resilient executor: per-attempt timeout, circuit breaker and the
/// shared backoff inputs of the retry policy table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Single attempt timeout (unit: milliseconds)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Failure count at which the circuit opens
    #[serde(default = "default_circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// Cool-down before a half-open probe is allowed (unit: milliseconds)
    #[serde(default = "default_circuit_breaker_timeout_ms")]
    pub circuit_breaker_timeout_ms: u64,

    /// Attempt budget for connection and network failures.
    /// Unclassified failures get half of it.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to connection backoff (unit: milliseconds)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Capacity of the observability event channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            circuit_breaker_threshold: default_circuit_breaker_threshold(),
            circuit_breaker_timeout_ms: default_circuit_breaker_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "executor.operation_timeout_ms must be at least 1ms".into(),
            )));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(Error::Config(ConfigError::Message(
                "executor.circuit_breaker_threshold must be greater than 0".into(),
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config(ConfigError::Message(
                "executor.max_retries must be greater than 0".into(),
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "executor.base_delay_ms ({}) cannot exceed executor.max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ))));
        }
        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "executor.event_buffer_size cannot be 0".into(),
            )));
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_timeout_ms)
    }
}

fn default_operation_timeout_ms() -> u64 {
    10_000
}
fn default_circuit_breaker_threshold() -> u32 {
    5
}
fn default_circuit_breaker_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_jitter_ms() -> u64 {
    1_000
}
fn default_event_buffer_size() -> usize {
    256
}
