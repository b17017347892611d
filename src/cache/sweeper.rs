use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::BoundedTtlCache;

/// Spawns the periodic purge of expired cache entries.
///
/// The first purge happens one full `period` after spawning. The task exits when `shutdown`
/// is cancelled.
pub fn spawn_sweeper(
    cache: Arc<BoundedTtlCache>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately on the first tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cache sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        debug!(purged, remaining = cache.len(), "Purged expired cache entries");
                    }
                }
            }
        }
    })
}
