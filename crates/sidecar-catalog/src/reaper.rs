//! Periodic catalog maintenance

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::Catalog;

/// Remote services not refreshed within this window are tombstoned
pub const ALIVE_LIFESPAN: Duration = Duration::from_secs(80);
/// Tombstones older than this are forgotten
pub const TOMBSTONE_LIFESPAN: Duration = Duration::from_secs(3 * 60 * 60);
pub const REAP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub alive_lifespan: Duration,
    pub tombstone_lifespan: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: REAP_INTERVAL,
            alive_lifespan: ALIVE_LIFESPAN,
            tombstone_lifespan: TOMBSTONE_LIFESPAN,
        }
    }
}

/// Run one maintenance pass, returning (tombstoned, pruned)
pub fn reap(catalog: &Catalog, config: &ReaperConfig) -> (usize, usize) {
    let now = Utc::now();
    let alive = chrono::Duration::from_std(config.alive_lifespan).unwrap_or(chrono::Duration::MAX);
    let tombstone = chrono::Duration::from_std(config.tombstone_lifespan).unwrap_or(chrono::Duration::MAX);

    let tombstoned = catalog.tombstone_stale(now, alive);
    let pruned = catalog.prune_tombstones(now, tombstone);
    (tombstoned, pruned)
}

/// Spawn the maintenance loop; it exits when `cancel` fires
pub fn spawn_reaper(catalog: Arc<Catalog>, config: ReaperConfig, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let (tombstoned, pruned) = reap(&catalog, &config);
                    if tombstoned > 0 || pruned > 0 {
                        info!(tombstoned, pruned, "Catalog reaper pass");
                    } else {
                        debug!("Catalog reaper pass completed");
                    }
                }
            }
        }
        info!("Catalog reaper stopped");
    })
}
