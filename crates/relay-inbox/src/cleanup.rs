use std::sync::Arc;

use tokio::sync::watch;

use crate::Inbox;

/// Periodic deletion of terminal rows past the retention window (§4.3),
/// the same `tokio::select!`-over-sleep-and-shutdown shape as the outbox
/// cleanup loop.
pub async fn cleanup_loop(inbox: Arc<Inbox>, mut shutdown: watch::Receiver<bool>) {
    let interval = inbox.config().cleanup_interval;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                match inbox.cleanup_once().await {
                    Ok(0) => {}
                    Ok(deleted) => {
                        tracing::info!(event = "relay.inbox.cleanup", deleted, "removed terminal inbox rows");
                    }
                    Err(error) => {
                        tracing::warn!(event = "relay.inbox.cleanup.error", %error, "inbox cleanup pass failed");
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
