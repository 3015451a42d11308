use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_core::{Error, MonotonicClock, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::{validate_renew_fraction, RenewOutcome};
use crate::store::LeaseStore;

/// Background renewal cadence: how often the runner wakes up to compare the
/// monotonic clock against its stored deadline. Independent of the lease
/// duration — the deadline, not the poll interval, decides when a renewal
/// actually fires (§4.6).
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Self-renewing wrapper around a [`LeaseStore`] hold (C7). `Acquire`
/// returns `None` if another owner holds the name. On success the runner
/// starts a background task that renews on a monotonic-clock deadline and
/// exposes a "lost" signal the holder can select on (§4.6, §5: "loss of the
/// lease cancels the runner's own cancellation token").
pub struct Runner {
    name: String,
    epoch: i64,
    store: LeaseStore,
    clock: Arc<dyn MonotonicClock>,
    duration: Duration,
    renew_fraction: f64,
    deadline: Arc<Mutex<Instant>>,
    is_lost: Arc<AtomicBool>,
    disposed: Arc<AtomicBool>,
    lost_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub async fn acquire(
        store: LeaseStore,
        clock: Arc<dyn MonotonicClock>,
        name: impl Into<String>,
        owner: impl Into<String>,
        duration: Duration,
        renew_fraction: f64,
    ) -> Result<Option<Self>> {
        validate_renew_fraction(renew_fraction)?;
        let name = name.into();
        let owner = owner.into();

        let Some(lease) = store.acquire(&name, &owner, duration).await? else {
            return Ok(None);
        };

        let deadline = Arc::new(Mutex::new(
            clock.now() + duration.mul_f64(renew_fraction),
        ));
        let is_lost = Arc::new(AtomicBool::new(false));
        let disposed = Arc::new(AtomicBool::new(false));
        let (lost_tx, lost_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(renewal_loop(
            store.clone(),
            clock.clone(),
            name.clone(),
            lease.epoch,
            duration,
            renew_fraction,
            deadline.clone(),
            is_lost.clone(),
            lost_tx.clone(),
            shutdown_rx,
        ));

        Ok(Some(Self {
            name,
            epoch: lease.epoch,
            store,
            clock,
            duration,
            renew_fraction,
            deadline,
            is_lost,
            disposed,
            lost_tx,
            lost_rx,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    pub fn is_lost(&self) -> bool {
        self.is_lost.load(Ordering::SeqCst)
    }

    /// Throws once the runner has observed its lease lost to another
    /// acquirer (§4.6).
    pub fn throw_if_lost(&self) -> Result<()> {
        if self.is_lost() {
            Err(Error::LeaseLost {
                name: self.name.clone(),
            })
        } else {
            Ok(())
        }
    }

    /// A receiver that flips to `true` exactly once, when the lease is lost.
    pub fn lost_signal(&self) -> watch::Receiver<bool> {
        self.lost_rx.clone()
    }

    /// Out-of-band renewal, independent of the background schedule. Returns
    /// `false` once disposed or once the lease is already lost (§4.6:
    /// "After `Dispose`, `TryRenewNow` returns false and no further renewals
    /// are scheduled").
    pub async fn try_renew_now(&self) -> bool {
        if self.disposed.load(Ordering::SeqCst) || self.is_lost() {
            return false;
        }
        match self.store.renew(&self.name, self.epoch, self.duration).await {
            Ok(RenewOutcome::Renewed { .. }) => {
                let mut guard = self.deadline.lock().expect("deadline mutex poisoned");
                *guard = self.clock.now() + self.duration.mul_f64(self.renew_fraction);
                true
            }
            Ok(RenewOutcome::Lost) => {
                self.is_lost.store(true, Ordering::SeqCst);
                let _ = self.lost_tx.send(true);
                false
            }
            Err(error) => {
                tracing::warn!(
                    event = "relay.lease.try_renew_now.error",
                    %error,
                    lease = %self.name,
                    "out-of-band lease renewal failed transiently"
                );
                false
            }
        }
    }

    /// Stops the background renewal loop. Idempotent; safe to call more
    /// than once. Does not release the row — the lease simply expires.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().expect("task mutex poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn renewal_loop(
    store: LeaseStore,
    clock: Arc<dyn MonotonicClock>,
    name: String,
    epoch: i64,
    duration: Duration,
    renew_fraction: f64,
    deadline: Arc<Mutex<Instant>>,
    is_lost: Arc<AtomicBool>,
    lost_tx: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                if is_lost.load(Ordering::SeqCst) {
                    break;
                }
                let due = *deadline.lock().expect("deadline mutex poisoned");
                if clock.now() < due {
                    continue;
                }
                match store.renew(&name, epoch, duration).await {
                    Ok(RenewOutcome::Renewed { .. }) => {
                        let mut guard = deadline.lock().expect("deadline mutex poisoned");
                        *guard = clock.now() + duration.mul_f64(renew_fraction);
                    }
                    Ok(RenewOutcome::Lost) => {
                        is_lost.store(true, Ordering::SeqCst);
                        let _ = lost_tx.send(true);
                        break;
                    }
                    Err(error) => {
                        tracing::warn!(event = "relay.lease.renew.error", %error, lease = %name, "scheduled lease renewal failed transiently");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
