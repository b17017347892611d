use std::time::Duration;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

use crate::ExecutorConfig;
use crate::NotifierConfig;

/// Routes this thread's tracing output to the test writer until the guard is dropped.
///
/// Thread-local on purpose: `#[traced_test]` owns the global subscriber.
pub fn enable_logger() -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// Fast, deterministic configuration: short delays, no jitter, 100ms polling
pub fn fast_config() -> NotifierConfig {
    let mut config = NotifierConfig::default();
    config.executor = ExecutorConfig {
        operation_timeout_ms: 1_000,
        circuit_breaker_threshold: 50,
        circuit_breaker_timeout_ms: 5_000,
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 100,
        jitter_ms: 0,
        event_buffer_size: 64,
    };
    config.poller.polling_interval_ms = 100;
    config.poller.push_safety_poll_interval_ms = 1_000;
    config.cache.sweep_interval_ms = 1_000;
    config
}

/// Lets spawned tasks run and the paused clock move by `d`
pub async fn settle(d: Duration) {
    tokio::time::sleep(d).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
