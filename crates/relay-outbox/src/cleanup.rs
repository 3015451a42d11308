use std::sync::Arc;

use tokio::sync::watch;

use crate::Outbox;

/// Periodic deletion of `Done` rows past the retention window (§4.2),
/// shaped like the teacher's `outbox_drain_loop`/`lease_reaper_loop`: a
/// `tokio::select!` between a sleep and a shutdown signal, logging and
/// continuing rather than propagating errors out of the task.
pub async fn cleanup_loop(outbox: Arc<Outbox>, mut shutdown: watch::Receiver<bool>) {
    let interval = outbox.config().cleanup_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match outbox.cleanup_once().await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        tracing::info!(event = "relay.outbox.cleanup", deleted, "removed completed outbox rows");
                    }
                    Err(error) => {
                        tracing::warn!(event = "relay.outbox.cleanup.error", %error, "outbox cleanup pass failed");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
