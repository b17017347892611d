use std::sync::Arc;
use std::time::Duration;

use d_notify::ChangeEvent;
use d_notify::ChangeNotifier;
use d_notify::ChangeType;
use d_notify::MemStorage;
use d_notify::NotifierConfig;
use parking_lot::Mutex;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::EnvFilter;

pub fn enable_logger() -> DefaultGuard {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

/// 100ms polling, 10ms retry base, no jitter
pub fn test_config() -> NotifierConfig {
    let mut config = NotifierConfig::default();
    config.executor.operation_timeout_ms = 1_000;
    config.executor.circuit_breaker_threshold = 50;
    config.executor.circuit_breaker_timeout_ms = 5_000;
    config.executor.max_retries = 3;
    config.executor.base_delay_ms = 10;
    config.executor.max_delay_ms = 100;
    config.executor.jitter_ms = 0;
    config.poller.polling_interval_ms = 100;
    config.poller.push_safety_poll_interval_ms = 1_000;
    config
}

pub fn start(storage: &Arc<MemStorage>) -> ChangeNotifier {
    ChangeNotifier::new(storage.clone(), test_config()).expect("notifier builds")
}

pub async fn settle(d: Duration) {
    tokio::time::sleep(d).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// Shared sink for events delivered to a closure listener
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<ChangeEvent>>>);

impl Events {
    pub fn listener(&self) -> impl Fn(&ChangeEvent) + Send + Sync + 'static {
        let sink = self.0.clone();
        move |event: &ChangeEvent| sink.lock().push(event.clone())
    }

    pub fn all(&self) -> Vec<ChangeEvent> {
        self.0.lock().clone()
    }

    pub fn types(&self) -> Vec<ChangeType> {
        self.0.lock().iter().map(|e| e.change_type).collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}
