use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use super::BackoffPolicy;
use super::CircuitBreaker;
use super::CircuitState;
use super::EventEmitter;
use super::ExecutionContext;
use super::ExecutorEvent;
use super::OperationKind;
use super::ResourceMonitor;
use crate::constants::TIMEOUT_GROWTH;
use crate::Error;
use crate::ErrorCategory;
use crate::ExecutorConfig;
use crate::Result;
use crate::StorageError;
use crate::StorageResult;

/// Wraps storage operations in timeout, retry and circuit breaking.
///
/// One instance holds one breaker; every operation routed through it counts towards the same
/// failure budget.
pub struct ResilientExecutor {
    config: ExecutorConfig,
    pub(crate) breaker: CircuitBreaker,
    events: EventEmitter,
    resource_monitor: Option<Arc<dyn ResourceMonitor>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ResilientExecutor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ResilientExecutor")
            .field("config", &self.config)
            .field("breaker", &self.breaker)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ResilientExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout(),
            ),
            events: EventEmitter::new(config.event_buffer_size),
            resource_monitor: None,
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn with_resource_monitor(
        mut self,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        self.resource_monitor = Some(monitor);
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn failure_count(&self) -> u32 {
        self.breaker.failure_count()
    }

    /// Subscribe to `operation_failed` / `operation_succeeded` / `circuit_opened` events
    pub fn events(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }

    /// Stops new attempts from starting. Attempts already running finish or time out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs `operation` under the executor's policies, starting from attempt 1.
    pub async fn execute<T, F, Fut>(
        &self,
        kind: OperationKind,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let ctx = ExecutionContext::new(kind, self.config.operation_timeout());
        self.execute_with_context(ctx, operation).await
    }

    /// Runs `operation` starting from the attempt number and timeout carried by `ctx`.
    ///
    /// Each retry goes through the same circuit check and timeout race as the first attempt.
    pub async fn execute_with_context<T, F, Fut>(
        &self,
        mut ctx: ExecutionContext,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        loop {
            if self.is_closed() {
                return Err(Error::Shutdown);
            }

            let permit = self
                .breaker
                .try_acquire()
                .map_err(|retry_in| Error::CircuitOpen { retry_in })?;

            let started = Instant::now();
            let outcome = match timeout(ctx.timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout(ctx.timeout)),
            };

            let error = match outcome {
                Ok(value) => {
                    self.breaker.record_success(permit);
                    self.events.emit(ExecutorEvent::OperationSucceeded {
                        kind: ctx.kind,
                        attempt: ctx.attempt,
                        elapsed: started.elapsed(),
                    });
                    return Ok(value);
                }
                Err(e) => e,
            };

            let category = error.category();
            let opened = self.breaker.record_failure(permit);
            self.events.emit(ExecutorEvent::OperationFailed {
                kind: ctx.kind,
                category,
                attempt: ctx.attempt,
                message: error.to_string(),
            });
            if opened {
                self.events.emit(ExecutorEvent::CircuitOpened {
                    failure_count: self.breaker.failure_count(),
                });
            }

            warn!(
                kind = %ctx.kind,
                attempt = ctx.attempt,
                %category,
                "Storage operation failed: {}",
                error
            );

            if category == ErrorCategory::DataCorruption {
                return Err(Error::Storage(error));
            }

            let policy = BackoffPolicy::for_category(category, &self.config);
            if !policy.allows_retry(ctx.attempt) {
                return Err(Error::RetryExhausted {
                    category,
                    attempts: ctx.attempt,
                    source: error,
                });
            }

            // A retry would be rejected by the breaker anyway; fail fast instead of sleeping.
            if let Err(retry_in) = self.breaker_admits_retry() {
                debug!(kind = %ctx.kind, "Circuit open, abandoning retries");
                return Err(Error::CircuitOpen { retry_in });
            }

            let delay = policy.delay_for(ctx.attempt, &error);
            match category {
                ErrorCategory::Resource => {
                    if let Some(monitor) = &self.resource_monitor {
                        let under_pressure = monitor.under_pressure();
                        debug!(under_pressure, "Releasing resources before retry");
                        monitor.release_resources();
                    }
                }
                ErrorCategory::Timeout => {
                    ctx.timeout = ctx.timeout * TIMEOUT_GROWTH.0 / TIMEOUT_GROWTH.1;
                }
                _ => {}
            }

            debug!(kind = %ctx.kind, attempt = ctx.attempt, ?delay, "Retrying after backoff");
            sleep(delay).await;
            ctx.attempt += 1;
        }
    }

    /// Peeks at the breaker without consuming a probe
    fn breaker_admits_retry(&self) -> std::result::Result<(), std::time::Duration> {
        match self.breaker.retry_in() {
            Some(remaining) if !remaining.is_zero() => Err(remaining),
            _ => Ok(()),
        }
    }
}
