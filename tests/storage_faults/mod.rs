//! Notifier behaviour while the storage collaborator misbehaves
use std::sync::Arc;
use std::time::Duration;

use d_notify::ChangeNotifier;
use d_notify::ChangeSource;
use d_notify::ChangeType;
use d_notify::CircuitState;
use d_notify::Error;
use d_notify::ErrorCategory;
use d_notify::ExecutorEvent;
use d_notify::MemStorage;
use d_notify::OperationKind;
use d_notify::StorageCollaborator;
use d_notify::StorageError;
use d_notify::WatchOptions;
use serde_json::json;
use tokio::time::Instant;

use crate::common::enable_logger;
use crate::common::settle;
use crate::common::start;
use crate::common::test_config;
use crate::common::Events;

#[tokio::test(start_paused = true)]
async fn test_transient_connection_failures_are_retried() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    storage.fail_next(
        OperationKind::Write,
        StorageError::Connection("connection reset".into()),
        2,
    );

    let result = notifier.write("k", json!(1)).await.unwrap();

    assert!(result.success);
    assert_eq!(storage.snapshot_of("k").map(|s| s.value), Some(json!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_growing_timeout_lets_slow_write_through() {
    let _log = enable_logger();
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let mut events = notifier.executor_events();

    // attempts time out at 1000ms and 1500ms, the third gets 2250ms
    storage.set_latency(Duration::from_millis(2_000));
    notifier.write("k", json!("slow")).await.unwrap();

    let mut timeouts = 0;
    while let Ok(event) = events.try_recv() {
        if let ExecutorEvent::OperationFailed { category, .. } = event {
            assert_eq!(category, ErrorCategory::Timeout);
            timeouts += 1;
        }
    }
    assert_eq!(timeouts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_budget_is_three_attempts() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    storage.set_latency(Duration::from_secs(10));

    let err = notifier.write("k", json!(1)).await.unwrap_err();

    match err {
        Error::RetryExhausted {
            category, attempts, ..
        } => {
            assert_eq!(category, ErrorCategory::Timeout);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_waits_for_retry_after_hint() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    storage.fail_next(
        OperationKind::Read,
        StorageError::RateLimit {
            message: "slow down".into(),
            retry_after: Some(Duration::from_millis(300)),
        },
        1,
    );

    let started = Instant::now();
    notifier.read("k").await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_retried_once() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    storage.fail_next(
        OperationKind::Delete,
        StorageError::Authentication("token expired".into()),
        5,
    );

    let err = notifier.delete("k").await.unwrap_err();

    assert_eq!(err.category(), Some(ErrorCategory::Authentication));
    assert!(matches!(err, Error::RetryExhausted { attempts: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_recovers_after_cool_down() {
    let storage = Arc::new(MemStorage::new());
    let mut config = test_config();
    config.executor.circuit_breaker_threshold = 2;
    let notifier = ChangeNotifier::new(storage.clone(), config).unwrap();

    storage.fail_next(
        OperationKind::Write,
        StorageError::DataCorruption("bad page".into()),
        2,
    );
    for _ in 0..2 {
        assert!(notifier.write("k", json!(1)).await.is_err());
    }
    assert!(notifier.write("k", json!(1)).await.unwrap_err().is_circuit_open());
    assert_eq!(notifier.status().circuit_state, CircuitState::Open);

    tokio::time::sleep(Duration::from_secs(5)).await;

    notifier.write("k", json!(1)).await.unwrap();
    assert_eq!(notifier.status().circuit_state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_lost_connection_is_probed_and_polling_resumes() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("k", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;

    storage.set_connected(false);
    storage.fail_next(
        OperationKind::Reconnect,
        StorageError::Connection("refused".into()),
        3,
    );
    storage.set_silently("k", json!("while offline"));

    settle(Duration::from_millis(150)).await;
    assert!(storage.reconnect_count() >= 3);
    assert_eq!(events.len(), 0);

    settle(Duration::from_millis(300)).await;
    assert!(storage.is_connected());
    assert_eq!(events.types(), vec![ChangeType::Created]);
}

#[tokio::test(start_paused = true)]
async fn test_push_failure_falls_back_to_polling() {
    let storage = Arc::new(MemStorage::with_push());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("k", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;

    storage.fail_next(
        OperationKind::Subscribe,
        StorageError::Connection("change streams disabled".into()),
        50,
    );
    storage.break_push_channel("k", StorageError::Network("cursor killed".into()));
    settle(Duration::from_secs(2)).await;
    assert_eq!(notifier.status().watched_key_count, 1);

    storage.set_silently("k", json!("polled"));
    settle(Duration::from_millis(150)).await;

    let all = events.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].source, ChangeSource::Poll);
}
