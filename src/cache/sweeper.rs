//! Periodic eviction of expired claims.
//!
//! Entries are refreshed by every successful reconcile of their owner. If a
//! delete notification is missed, nothing refreshes the entry again and the
//! sweeper drops it once its TTL has elapsed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::ConflictCache;
use crate::health::HealthState;

/// Run the sweep loop until `shutdown` is cancelled.
///
/// The first sweep happens one full `interval` after start.
pub async fn run_sweeper(
    cache: Arc<ConflictCache>,
    interval: Duration,
    shutdown: CancellationToken,
    health_state: Option<Arc<HealthState>>,
) {
    info!(interval_secs = interval.as_secs(), "Starting cache sweeper");

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let evicted = cache.sweep(Instant::now());
                let remaining = cache.len();
                if evicted > 0 {
                    debug!(evicted, remaining, "Evicted expired claims");
                }
                if let Some(ref state) = health_state {
                    state.metrics.record_sweep(evicted, remaining);
                }
            }
        }
    }

    info!("Cache sweeper stopped");
}
