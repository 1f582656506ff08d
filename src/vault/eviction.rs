//! Background staleness eviction.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::vault::store::ContextVault;

/// Run `evict_stale(threshold)` on `vault` every `interval` until the task is aborted.
pub fn spawn_eviction_task(vault: ContextVault, interval: Duration, threshold: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Eviction task started (interval {:?}, threshold {:?})",
            interval, threshold
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = vault.evict_stale(threshold).await;
            if removed > 0 {
                info!("Evicted {} stale patient contexts", removed);
            } else {
                debug!("No stale patient contexts to evict");
            }
        }
    })
}
