//! Change-notification error hierarchy
//!
//! Two layers:
//! - [`StorageError`]: a failure reported by (or on behalf of) the storage collaborator. Every
//!   variant maps onto one [`ErrorCategory`], which selects the retry policy applied by the
//!   resilient executor.
//! - [`Error`]: what the notifier surfaces to its caller once retries are exhausted, the circuit
//!   is open, or input validation fails.

use std::fmt;
use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failure reported by the storage collaborator that is surfaced without retry
    /// (data corruption) or that carries no retry budget at all.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The category-specific attempt budget was used up.
    #[error("{category} failure persisted after {attempts} attempt(s): {source}")]
    RetryExhausted {
        category: ErrorCategory,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    /// Circuit breaker rejected the call without invoking the operation.
    #[error("Circuit breaker is open, next probe allowed in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// Bad key, bad listener registration or out-of-range setting.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Configuration could not be loaded or failed validation
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The notifier has been destroyed; no new operations are started.
    #[error("Change notifier has been shut down")]
    Shutdown,
}

impl Error {
    /// Category of the underlying storage failure, if any.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Error::Storage(e) => Some(e.category()),
            Error::RetryExhausted { category, .. } => Some(*category),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Error::CircuitOpen { .. })
    }

    /// The storage failure behind this error, if it came from the collaborator
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            Error::Storage(e) | Error::RetryExhausted { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

/// Failures a storage collaborator may report.
///
/// Collaborators that have structured errors should construct the matching variant directly;
/// collaborators that only have an error message can use [`StorageError::classify`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Connection failure: {0}")]
    Connection(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Memory, disk or handle exhaustion on either side of the connection
    #[error("Resource exhausted: {0}")]
    Resource(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Stored bytes could not be decoded or failed an integrity check
    #[error("Data corruption detected: {0}")]
    DataCorruption(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("{0}")]
    Unknown(String),
}

impl StorageError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Connection(_) => ErrorCategory::Connection,
            StorageError::Timeout(_) => ErrorCategory::Timeout,
            StorageError::Resource(_) => ErrorCategory::Resource,
            StorageError::Authentication(_) => ErrorCategory::Authentication,
            StorageError::RateLimit { .. } => ErrorCategory::RateLimit,
            StorageError::DataCorruption(_) => ErrorCategory::DataCorruption,
            StorageError::Network(_) => ErrorCategory::Network,
            StorageError::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Builds a classified error from a free-form failure message.
    ///
    /// Matching is case-insensitive and checks the most specific categories first, so
    /// "connection timed out" is a timeout and "network connection reset" is a connection
    /// failure.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

        if has(&["corrupt", "checksum", "malformed", "invalid bson", "decode"]) {
            StorageError::DataCorruption(message)
        } else if has(&["auth", "unauthorized", "permission denied", "credential"]) {
            StorageError::Authentication(message)
        } else if has(&["rate limit", "too many requests", "throttl"]) {
            StorageError::RateLimit {
                message,
                retry_after: None,
            }
        } else if has(&["timeout", "timed out"]) {
            StorageError::Timeout(Duration::ZERO)
        } else if has(&["out of memory", "memory", "disk full", "no space", "enospc", "emfile"]) {
            StorageError::Resource(message)
        } else if has(&["econnrefused", "econnreset", "connection", "not connected", "topology"]) {
            StorageError::Connection(message)
        } else if has(&["network", "enotfound", "ehostunreach", "socket", "dns"]) {
            StorageError::Network(message)
        } else {
            StorageError::Unknown(message)
        }
    }
}

/// Failure categories driving the retry policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Connection,
    Timeout,
    Resource,
    Authentication,
    RateLimit,
    DataCorruption,
    Network,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::DataCorruption => "data_corruption",
            ErrorCategory::Network => "network",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
