use std::time::SystemTime;

use crate::CacheStats;
use crate::CircuitState;

/// Point-in-time view of the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct NotifierStatus {
    /// The shared scheduler loop is running
    pub polling: bool,
    pub polling_interval_ms: u64,
    /// Keys with at least one registered listener
    pub watched_key_count: usize,
    pub cache_size: usize,
    /// Completion time of the most recent poll tick that issued reads
    pub last_poll_at: Option<SystemTime>,
    pub circuit_state: CircuitState,
    pub cache_stats: CacheStats,
}

/// Result of [`crate::ChangeNotifier::write`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResult {
    pub success: bool,
    pub key: String,
    /// The key did not exist before the write
    pub upserted: bool,
    /// An existing value was replaced
    pub modified: bool,
}

/// Result of [`crate::ChangeNotifier::delete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub success: bool,
    pub deleted: bool,
}
