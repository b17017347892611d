//! Process-wide circuit breaker shared by every operation of one executor.
//!
//! ```text
//! CLOSED --(failure_count >= threshold)--> OPEN --(cool-down elapsed)--> HALF_OPEN
//! HALF_OPEN --(probe succeeds)--> CLOSED (failure_count = 0)
//! HALF_OPEN --(probe fails)--> OPEN
//! ```

use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Admission ticket returned by [`CircuitBreaker::try_acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Normal,
    /// The single call allowed through while HALF_OPEN
    Probe,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_started_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    cool_down: Duration,
}

impl CircuitBreaker {
    pub fn new(
        threshold: u32,
        cool_down: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                probe_started_at: None,
            }),
            threshold,
            cool_down,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Remaining cool-down while OPEN. Unlike [`CircuitBreaker::try_acquire`] this never
    /// moves the breaker to HALF_OPEN.
    pub fn retry_in(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner
            .last_failure_at
            .map(|t| Instant::now().saturating_duration_since(t))
            .unwrap_or(self.cool_down);
        Some(self.cool_down.saturating_sub(elapsed))
    }

    /// Admits a call or returns how long until the next probe may be attempted.
    ///
    /// A probe whose outcome was never recorded (its future was dropped) stops blocking
    /// further probes once a full cool-down has passed since it started.
    pub fn try_acquire(&self) -> Result<Permit, Duration> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let since = inner.last_failure_at.map(|t| now.saturating_duration_since(t));
                match since {
                    Some(elapsed) if elapsed < self.cool_down => Err(self.cool_down - elapsed),
                    _ => {
                        info!("Circuit breaker cool-down elapsed, allowing one probe");
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_started_at = Some(now);
                        Ok(Permit::Probe)
                    }
                }
            }
            CircuitState::HalfOpen => match inner.probe_started_at {
                Some(started) if now.saturating_duration_since(started) < self.cool_down => {
                    Err(self.cool_down - now.saturating_duration_since(started))
                }
                _ => {
                    debug!("Previous probe never reported back, allowing a new one");
                    inner.probe_started_at = Some(now);
                    Ok(Permit::Probe)
                }
            },
        }
    }

    pub fn record_success(
        &self,
        permit: Permit,
    ) {
        let mut inner = self.inner.lock();
        if permit == Permit::Probe && inner.state == CircuitState::HalfOpen {
            info!("Probe succeeded, circuit breaker closed");
            inner.state = CircuitState::Closed;
            inner.failure_count = 0;
            inner.probe_started_at = None;
        } else {
            inner.failure_count = inner.failure_count.saturating_sub(1);
        }
    }

    /// Records a failed call. Returns true if this failure opened the circuit.
    pub fn record_failure(
        &self,
        permit: Permit,
    ) -> bool {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        let was_open = inner.state == CircuitState::Open;
        let probe_failed = permit == Permit::Probe && inner.state == CircuitState::HalfOpen;

        if probe_failed || inner.failure_count >= self.threshold {
            inner.state = CircuitState::Open;
            inner.probe_started_at = None;
            if !was_open {
                warn!(
                    failure_count = inner.failure_count,
                    probe_failed, "Circuit breaker opened"
                );
                return true;
            }
        }
        false
    }

    /// Forces the breaker back to its initial state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.probe_started_at = None;
    }
}
