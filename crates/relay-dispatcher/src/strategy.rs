use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use relay_core::{SelectionStrategy, WorkQueueStore};

/// At each call, advance to the next store in rotation regardless of the
/// previous claim's outcome (§4.4).
#[derive(Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: WorkQueueStore> SelectionStrategy<S> for RoundRobin {
    fn select_next(&self, stores: &[Arc<S>], _last_claimed: Option<usize>) -> Option<Arc<S>> {
        if stores.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % stores.len();
        Some(stores[idx].clone())
    }
}

/// Keep claiming from the current store until it returns zero, then advance
/// (§4.4).
#[derive(Default)]
pub struct DrainFirst {
    current: AtomicUsize,
}

impl DrainFirst {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: WorkQueueStore> SelectionStrategy<S> for DrainFirst {
    fn select_next(&self, stores: &[Arc<S>], last_claimed: Option<usize>) -> Option<Arc<S>> {
        if stores.is_empty() {
            return None;
        }
        // `None` covers the first call and a store-set reshape; `Some(0)`
        // means the current store is drained. Either way, advance.
        if matches!(last_claimed, None | Some(0)) {
            self.current.fetch_add(1, Ordering::Relaxed);
        }
        let idx = self.current.load(Ordering::Relaxed) % stores.len();
        Some(stores[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{ClaimedItem, DatabaseIdentifier, OwnerToken, Result};
    use std::time::Duration;
    use uuid::Uuid;

    use super::*;

    struct FakeStore(Uuid);

    #[async_trait::async_trait]
    impl WorkQueueStore for FakeStore {
        type Id = Uuid;

        fn identifier(&self) -> DatabaseIdentifier {
            DatabaseIdentifier(self.0)
        }

        async fn claim(
            &self,
            _owner: OwnerToken,
            _lease: Duration,
            _batch_size: u32,
        ) -> Result<Vec<ClaimedItem<Self::Id>>> {
            Ok(Vec::new())
        }

        async fn ack(&self, _owner: OwnerToken, _ids: &[Self::Id]) -> Result<()> {
            Ok(())
        }

        async fn abandon(
            &self,
            _owner: OwnerToken,
            _ids: &[Self::Id],
            _last_error: Option<&str>,
            _delay: Option<Duration>,
        ) -> Result<()> {
            Ok(())
        }

        async fn fail(&self, _owner: OwnerToken, _ids: &[Self::Id], _last_error: &str) -> Result<()> {
            Ok(())
        }

        async fn reap_expired(&self, _max_rows: u32) -> Result<u64> {
            Ok(0)
        }
    }

    fn stores(n: usize) -> Vec<Arc<FakeStore>> {
        (0..n).map(|_| Arc::new(FakeStore(Uuid::new_v4()))).collect()
    }

    #[test]
    fn round_robin_always_advances() {
        let strategy = RoundRobin::new();
        let stores = stores(3);
        let a = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        let b = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        let c = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        let d = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        assert_ne!(a.identifier(), b.identifier());
        assert_ne!(b.identifier(), c.identifier());
        assert_eq!(a.identifier(), d.identifier());
    }

    #[test]
    fn drain_first_sticks_until_empty() {
        let strategy = DrainFirst::new();
        let stores = stores(2);
        let a = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, None).unwrap();
        let b = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        let c = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(5)).unwrap();
        assert_eq!(a.identifier(), b.identifier());
        assert_eq!(b.identifier(), c.identifier());

        let d = SelectionStrategy::<FakeStore>::select_next(&strategy, &stores, Some(0)).unwrap();
        assert_ne!(c.identifier(), d.identifier());
    }
}
