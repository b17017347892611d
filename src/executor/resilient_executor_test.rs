use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::*;
use crate::Error;
use crate::ErrorCategory;
use crate::ExecutorConfig;
use crate::StorageError;

fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        operation_timeout_ms: 100,
        circuit_breaker_threshold: 100,
        circuit_breaker_timeout_ms: 1_000,
        max_retries: 4,
        base_delay_ms: 10,
        max_delay_ms: 100,
        jitter_ms: 5,
        event_buffer_size: 16,
    }
}

/// Runs an always-failing operation and returns (result, invocation count)
async fn run_failing(
    executor: &ResilientExecutor,
    error: StorageError,
) -> (crate::Result<()>, u32) {
    let calls = Arc::new(AtomicU32::new(0));
    let result = executor
        .execute(OperationKind::Read, || {
            let calls = calls.clone();
            let error = error.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(error)
            }
        })
        .await;
    (result, calls.load(Ordering::SeqCst))
}

#[tokio::test(start_paused = true)]
async fn test_execute_returns_value_on_first_success() {
    let executor = ResilientExecutor::new(test_config());
    let mut events = executor.events();

    let value = executor
        .execute(OperationKind::Read, || async { Ok::<_, StorageError>(42) })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(executor.failure_count(), 0);
    assert_eq!(executor.circuit_state(), CircuitState::Closed);
    match events.try_recv().unwrap() {
        ExecutorEvent::OperationSucceeded { kind, attempt, .. } => {
            assert_eq!(kind, OperationKind::Read);
            assert_eq!(attempt, 1);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_connection_failure_is_attempted_exactly_max_retries_times() {
    let executor = ResilientExecutor::new(test_config());

    let (result, calls) = run_failing(&executor, StorageError::Connection("refused".into())).await;

    assert_eq!(calls, 4);
    match result {
        Err(Error::RetryExhausted {
            category, attempts, ..
        }) => {
            assert_eq!(category, ErrorCategory::Connection);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_uses_max_retries_budget() {
    let executor = ResilientExecutor::new(test_config());
    let (result, calls) = run_failing(&executor, StorageError::Network("reset".into())).await;

    assert_eq!(calls, 4);
    assert_eq!(result.unwrap_err().category(), Some(ErrorCategory::Network));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_failure_gets_half_the_budget() {
    let mut config = test_config();
    config.max_retries = 10;
    let executor = ResilientExecutor::new(config);

    let (result, calls) = run_failing(&executor, StorageError::Unknown("boom".into())).await;

    assert_eq!(calls, 5);
    assert!(matches!(result, Err(Error::RetryExhausted { attempts: 5, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_data_corruption_is_never_retried() {
    let executor = ResilientExecutor::new(test_config());

    let (result, calls) =
        run_failing(&executor, StorageError::DataCorruption("bad checksum".into())).await;

    assert_eq!(calls, 1);
    assert!(matches!(result, Err(Error::Storage(StorageError::DataCorruption(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_authentication_failure_is_retried_once_after_two_seconds() {
    let executor = ResilientExecutor::new(test_config());
    let started = Instant::now();

    let (result, calls) =
        run_failing(&executor, StorageError::Authentication("bad password".into())).await;

    assert_eq!(calls, 2);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(matches!(
        result,
        Err(Error::RetryExhausted {
            category: ErrorCategory::Authentication,
            attempts: 2,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_retries_three_times_with_growing_timeout() {
    let executor = ResilientExecutor::new(test_config());
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result = executor
        .execute(OperationKind::Read, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                std::future::pending::<crate::StorageResult<()>>().await
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // timeouts 100 + 150 + 225ms, backoff 1000 + 2000ms
    assert!(started.elapsed() >= Duration::from_millis(3_475));
    match result {
        Err(Error::RetryExhausted {
            category: ErrorCategory::Timeout,
            attempts: 3,
            source: StorageError::Timeout(last),
        }) => assert_eq!(last, Duration::from_millis(225)),
        other => panic!("unexpected result {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_honours_retry_after_hint() {
    let executor = ResilientExecutor::new(test_config());
    let calls = Arc::new(AtomicU32::new(0));
    let started = Instant::now();

    let result = executor
        .execute(OperationKind::Write, || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StorageError::RateLimit {
                        message: "slow down".into(),
                        retry_after: Some(Duration::from_millis(70)),
                    })
                } else {
                    Ok("written")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "written");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(70));
    assert!(elapsed < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_resource_failure_releases_resources_before_retry() {
    let mut monitor = MockResourceMonitor::new();
    monitor.expect_under_pressure().return_const(true);
    monitor.expect_release_resources().times(1).return_const(());
    let executor = ResilientExecutor::new(test_config()).with_resource_monitor(Arc::new(monitor));

    let (result, calls) = run_failing(&executor, StorageError::Resource("disk full".into())).await;

    assert_eq!(calls, 2);
    assert!(matches!(
        result,
        Err(Error::RetryExhausted {
            category: ErrorCategory::Resource,
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_threshold_and_rejects_without_invoking() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 3;
    let executor = ResilientExecutor::new(config);

    for _ in 0..3 {
        let (result, _) = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
        assert!(result.is_err());
    }
    assert_eq!(executor.circuit_state(), CircuitState::Open);

    let (result, calls) = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    assert_eq!(calls, 0);
    assert!(result.unwrap_err().is_circuit_open());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_success_closes_circuit() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 2;
    let executor = ResilientExecutor::new(config);

    for _ in 0..2 {
        let _ = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    }
    assert_eq!(executor.circuit_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;

    let value = executor
        .execute(OperationKind::Read, || async { Ok::<_, StorageError>(7) })
        .await
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(executor.circuit_state(), CircuitState::Closed);
    assert_eq!(executor.failure_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_allows_exactly_one_probe() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 1;
    config.operation_timeout_ms = 10_000;
    let executor = Arc::new(ResilientExecutor::new(config));

    let _ = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let release = Arc::new(Notify::new());
    let probe = {
        let executor = executor.clone();
        let release = release.clone();
        tokio::spawn(async move {
            executor
                .execute(OperationKind::Read, || {
                    let release = release.clone();
                    async move {
                        release.notified().await;
                        Ok::<_, StorageError>(())
                    }
                })
                .await
        })
    };
    for _ in 0..10 {
        if executor.circuit_state() == CircuitState::HalfOpen {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(executor.circuit_state(), CircuitState::HalfOpen);

    let (second, calls) = run_failing(&executor, StorageError::Connection("x".into())).await;
    assert_eq!(calls, 0);
    assert!(second.unwrap_err().is_circuit_open());

    release.notify_one();
    probe.await.unwrap().unwrap();
    assert_eq!(executor.circuit_state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_circuit() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 1;
    let executor = ResilientExecutor::new(config);

    let _ = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    tokio::time::advance(Duration::from_millis(1_001)).await;

    let (result, calls) = run_failing(&executor, StorageError::Connection("x".into())).await;
    assert_eq!(calls, 1);
    assert!(result.unwrap_err().is_circuit_open());
    assert_eq!(executor.circuit_state(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_when_circuit_opens_mid_way() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 2;
    config.max_retries = 10;
    let executor = ResilientExecutor::new(config);

    let (result, calls) = run_failing(&executor, StorageError::Connection("refused".into())).await;

    assert_eq!(calls, 2);
    match result.unwrap_err() {
        Error::CircuitOpen { retry_in } => {
            assert_eq!(Some(retry_in), executor.breaker.retry_in());
            assert!(retry_in <= Duration::from_millis(1_000));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_success_decays_failure_count_by_one() {
    let executor = ResilientExecutor::new(test_config());

    let _ = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    let _ = run_failing(&executor, StorageError::DataCorruption("x".into())).await;
    assert_eq!(executor.failure_count(), 2);

    executor
        .execute(OperationKind::Read, || async { Ok::<_, StorageError>(()) })
        .await
        .unwrap();
    assert_eq!(executor.failure_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_closed_executor_starts_no_new_attempts() {
    let executor = ResilientExecutor::new(test_config());
    executor.close();

    let (result, calls) = run_failing(&executor, StorageError::Connection("x".into())).await;

    assert_eq!(calls, 0);
    assert!(matches!(result, Err(Error::Shutdown)));
}

#[tokio::test(start_paused = true)]
async fn test_failure_events_are_published() {
    let mut config = test_config();
    config.circuit_breaker_threshold = 1;
    let executor = ResilientExecutor::new(config);
    let mut events = executor.events();

    let _ = run_failing(&executor, StorageError::DataCorruption("torn page".into())).await;

    match events.try_recv().unwrap() {
        ExecutorEvent::OperationFailed {
            category,
            attempt,
            message,
            ..
        } => {
            assert_eq!(category, ErrorCategory::DataCorruption);
            assert_eq!(attempt, 1);
            assert!(message.contains("torn page"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        events.try_recv().unwrap(),
        ExecutorEvent::CircuitOpened { failure_count: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_execute_with_context_continues_attempt_numbering() {
    let executor = ResilientExecutor::new(test_config());
    let ctx = ExecutionContext {
        kind: OperationKind::Reconnect,
        attempt: 3,
        timeout: Duration::from_millis(100),
    };
    let calls = Arc::new(AtomicU32::new(0));

    let result = executor
        .execute_with_context(ctx, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StorageError::Connection("down".into()))
            }
        })
        .await;

    // attempts 3 and 4 of a budget of 4
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(matches!(result, Err(Error::RetryExhausted { attempts: 4, .. })));
}
