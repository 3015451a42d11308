//! Monotonic clock abstraction used exclusively by the Lease Runner (C7) for
//! renewal scheduling (§4.6, §8 property 8, §9). Never used for timestamps
//! that are persisted or compared across processes — those always come from
//! the database server clock (`now()`).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait MonotonicClock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by `std::time::Instant`, which the platform
/// guarantees is monotonic and immune to wall-clock adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMonotonicClock;

impl MonotonicClock for SystemMonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Test clock that only advances when told to, so renewal scheduling can be
/// exercised deterministically across simulated pauses and wall-clock jumps
/// (§8 property 8, S8) without real sleeps.
#[derive(Clone)]
pub struct FakeMonotonicClock {
    inner: Arc<Mutex<Instant>>,
}

impl FakeMonotonicClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.inner.lock().expect("fake clock mutex poisoned");
        *guard += by;
    }
}

impl Default for FakeMonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for FakeMonotonicClock {
    fn now(&self) -> Instant {
        *self.inner.lock().expect("fake clock mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_only_advances_on_request() {
        let clock = FakeMonotonicClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);
        clock.advance(Duration::from_secs(30));
        assert!(clock.now() >= t0 + Duration::from_secs(30));
    }
}
