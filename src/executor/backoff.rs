//! Per-category retry policy table.
//!
//! | Category       | Delay before retry `n` (1-based attempt that failed) | Attempts          |
//! |----------------|------------------------------------------------------|-------------------|
//! | Connection     | `min(base * 2^(n-1) + rand(0..=jitter), max)`        | `max_retries`     |
//! | Timeout        | `1000ms * n` (attempt timeout grows 1.5x)            | 3                 |
//! | Resource       | fixed 5s, after releasing resources                  | 2                 |
//! | Authentication | fixed 2s                                             | 2                 |
//! | RateLimit      | retry-after hint (up to 1h), else 5s                 | 3                 |
//! | DataCorruption | never retried                                        | 1                 |
//! | Network        | `min(base * 2^n, max)`                               | `max_retries`     |
//! | Unknown        | `min(base * 2^(n-1), max)`                           | `max_retries / 2` |

use std::time::Duration;

use rand::Rng;

use crate::constants::AUTHENTICATION_MAX_ATTEMPTS;
use crate::constants::AUTHENTICATION_RETRY_DELAY_MS;
use crate::constants::RATE_LIMIT_DEFAULT_DELAY_MS;
use crate::constants::RATE_LIMIT_MAX_ATTEMPTS;
use crate::constants::RATE_LIMIT_MAX_HINT_MS;
use crate::constants::RESOURCE_MAX_ATTEMPTS;
use crate::constants::RESOURCE_RETRY_DELAY_MS;
use crate::constants::TIMEOUT_BACKOFF_STEP_MS;
use crate::constants::TIMEOUT_MAX_ATTEMPTS;
use crate::ErrorCategory;
use crate::ExecutorConfig;
use crate::StorageError;

/// How the delay between two attempts is computed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffSchedule {
    /// `min(base * 2^(attempt-1) + rand(0..=jitter), max)`
    ExponentialWithJitter {
        base: Duration,
        max: Duration,
        jitter: Duration,
    },
    /// `min(base * 2^(attempt-1+shift), max)`
    Exponential {
        base: Duration,
        max: Duration,
        shift: u32,
    },
    /// `step * attempt`
    Linear { step: Duration },
    Fixed(Duration),
    /// Server supplied retry-after hint (bounded by `ceiling`), else `default`
    RetryAfter { default: Duration, ceiling: Duration },
    Never,
}

/// Retry policy applied to one failure category
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts allowed, including the first one
    pub max_attempts: u32,
    pub schedule: BackoffSchedule,
}

impl BackoffPolicy {
    pub fn for_category(
        category: ErrorCategory,
        config: &ExecutorConfig,
    ) -> Self {
        let base = Duration::from_millis(config.base_delay_ms);
        let max = Duration::from_millis(config.max_delay_ms);

        match category {
            ErrorCategory::Connection => BackoffPolicy {
                max_attempts: config.max_retries,
                schedule: BackoffSchedule::ExponentialWithJitter {
                    base,
                    max,
                    jitter: Duration::from_millis(config.jitter_ms),
                },
            },
            ErrorCategory::Timeout => BackoffPolicy {
                max_attempts: TIMEOUT_MAX_ATTEMPTS,
                schedule: BackoffSchedule::Linear {
                    step: Duration::from_millis(TIMEOUT_BACKOFF_STEP_MS),
                },
            },
            ErrorCategory::Resource => BackoffPolicy {
                max_attempts: RESOURCE_MAX_ATTEMPTS,
                schedule: BackoffSchedule::Fixed(Duration::from_millis(RESOURCE_RETRY_DELAY_MS)),
            },
            ErrorCategory::Authentication => BackoffPolicy {
                max_attempts: AUTHENTICATION_MAX_ATTEMPTS,
                schedule: BackoffSchedule::Fixed(Duration::from_millis(
                    AUTHENTICATION_RETRY_DELAY_MS,
                )),
            },
            ErrorCategory::RateLimit => BackoffPolicy {
                max_attempts: RATE_LIMIT_MAX_ATTEMPTS,
                schedule: BackoffSchedule::RetryAfter {
                    default: Duration::from_millis(RATE_LIMIT_DEFAULT_DELAY_MS),
                    ceiling: Duration::from_millis(RATE_LIMIT_MAX_HINT_MS),
                },
            },
            ErrorCategory::DataCorruption => BackoffPolicy {
                max_attempts: 1,
                schedule: BackoffSchedule::Never,
            },
            ErrorCategory::Network => BackoffPolicy {
                max_attempts: config.max_retries,
                schedule: BackoffSchedule::Exponential { base, max, shift: 1 },
            },
            ErrorCategory::Unknown => BackoffPolicy {
                max_attempts: (config.max_retries / 2).max(1),
                schedule: BackoffSchedule::Exponential { base, max, shift: 0 },
            },
        }
    }

    /// Whether another attempt may follow the failed attempt number `attempt` (1-based)
    pub fn allows_retry(
        &self,
        attempt: u32,
    ) -> bool {
        !matches!(self.schedule, BackoffSchedule::Never) && attempt < self.max_attempts
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based)
    pub fn delay_for(
        &self,
        attempt: u32,
        error: &StorageError,
    ) -> Duration {
        let attempt = attempt.max(1);
        match self.schedule {
            BackoffSchedule::ExponentialWithJitter { base, max, jitter } => {
                let jitter_ms = if jitter.is_zero() {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=jitter.as_millis() as u64)
                };
                exponential(base, attempt - 1)
                    .saturating_add(Duration::from_millis(jitter_ms))
                    .min(max)
            }
            BackoffSchedule::Exponential { base, max, shift } => {
                exponential(base, attempt - 1 + shift).min(max)
            }
            BackoffSchedule::Linear { step } => step.saturating_mul(attempt),
            BackoffSchedule::Fixed(delay) => delay,
            BackoffSchedule::RetryAfter { default, ceiling } => match error {
                StorageError::RateLimit {
                    retry_after: Some(hint),
                    ..
                } => (*hint).min(ceiling),
                _ => default,
            },
            BackoffSchedule::Never => Duration::ZERO,
        }
    }
}

/// `base * 2^exp`, saturating instead of overflowing
fn exponential(
    base: Duration,
    exp: u32,
) -> Duration {
    let factor = 1u32.checked_shl(exp.min(31)).unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}
