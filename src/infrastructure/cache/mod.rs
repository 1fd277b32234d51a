//! Cache implementations and the expiry sweeper

mod memory;

pub use memory::InMemoryCache;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::support::ShutdownSignal;

/// Start the background task that purges expired cache entries.
///
/// Reads already ignore expired entries; this only bounds memory for keys
/// nobody reads again (poll-later results that were never fetched).
pub fn start_cache_sweeper(
    cache: Arc<InMemoryCache>,
    shutdown: ShutdownSignal,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "🧹 Cache sweeper started");

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.purge_expired();
                    if removed > 0 {
                        debug!(removed, "Purged expired cache entries");
                    }
                }
                _ = shutdown.notified().wait() => {
                    info!("🧹 Cache sweeper shutting down");
                    break;
                }
            }
        }
    })
}
