//! The distributed bounded semaphore (C6): unforgeable lease tokens and a
//! per-name monotonic fencing counter.

mod model;
mod store;

pub use model::{validate_name, AcquireOutcome, ReleaseOutcome, RenewOutcome};
pub use store::{migrate, Semaphore, SemaphoreConfig};
