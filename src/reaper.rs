use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// One reclamation pass. Returns how many holds were released.
pub async fn reap_once(engine: &Engine) -> usize {
    let expired = engine.collect_expired_holds(engine.now());
    let mut released = 0;
    for booking_id in expired {
        match engine.reclaim_expired_hold(booking_id).await {
            Ok(true) => released += 1,
            // Paid or reclaimed lazily between the scan and the lock.
            Ok(false) => debug!("reaper skip {booking_id}: no longer expired"),
            Err(e) => warn!("reaper failed on {booking_id}: {e}"),
        }
    }
    if released > 0 {
        info!("reaper released {released} expired holds");
    }
    let pruned = engine.notify.prune();
    if pruned > 0 {
        debug!("dropped {pruned} unwatched notification channels");
    }
    released
}

/// Background task that periodically gives expired holds back to the ledger.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_once(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = match engine.wal_appends_since_compact().await {
            Ok(n) => n,
            Err(e) => {
                warn!("compactor stopping: {e}");
                return;
            }
        };
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(true) => debug!("compacted after {appends} appends"),
            Ok(false) => debug!("compaction deferred, state busy"),
            Err(e) => warn!("compaction failed: {e}"),
        }
    }
}
