// -
// Scheduling limits

/// Smallest accepted polling interval
pub const MIN_POLLING_INTERVAL_MS: u64 = 100;

// -
// Retry policy table

/// Total attempts for a timeout-classified failure
pub(crate) const TIMEOUT_MAX_ATTEMPTS: u32 = 3;
/// Per-attempt backoff step for timeouts (delay = step * attempt)
pub(crate) const TIMEOUT_BACKOFF_STEP_MS: u64 = 1_000;
/// Growth of the operation timeout on each timeout retry, as (numerator, denominator): 1.5x
pub(crate) const TIMEOUT_GROWTH: (u32, u32) = (3, 2);

pub(crate) const RESOURCE_MAX_ATTEMPTS: u32 = 2;
pub(crate) const RESOURCE_RETRY_DELAY_MS: u64 = 5_000;

/// One retry after the first failure
pub(crate) const AUTHENTICATION_MAX_ATTEMPTS: u32 = 2;
pub(crate) const AUTHENTICATION_RETRY_DELAY_MS: u64 = 2_000;

pub(crate) const RATE_LIMIT_MAX_ATTEMPTS: u32 = 3;
pub(crate) const RATE_LIMIT_DEFAULT_DELAY_MS: u64 = 5_000;
/// Ceiling for a server supplied retry-after hint; independent of `max_delay_ms`
pub(crate) const RATE_LIMIT_MAX_HINT_MS: u64 = 3_600_000;

// -
// Change detection

/// Number of locks serializing change detection; keys hash onto one of them
pub(crate) const DETECT_LOCK_STRIPES: usize = 64;
