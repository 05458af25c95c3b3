//! Background sweep returning expired leases to the queue.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use viss_core::defaults::REAPER_INTERVAL;
use viss_core::JobQueue;

/// Spawn the reaper; it runs every second until `shutdown` flips to true.
pub fn spawn_reaper(
    queue: Arc<dyn JobQueue>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(REAPER_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            subsystem = "queue",
            component = "reaper",
            backend = queue.name(),
            "Lease reaper started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match queue.reap_expired().await {
                        Ok(0) => {}
                        Ok(n) => {
                            debug!(
                                subsystem = "queue",
                                component = "reaper",
                                reaped = n,
                                "Reaped expired leases"
                            );
                        }
                        Err(e) => {
                            warn!(
                                subsystem = "queue",
                                component = "reaper",
                                error = %e,
                                "Reaper sweep failed"
                            );
                        }
                    }
                }
            }
        }
        info!(subsystem = "queue", component = "reaper", "Lease reaper stopped");
    })
}
