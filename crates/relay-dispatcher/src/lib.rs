//! The multi-store dispatcher (C5): `StoreProvider` + `SelectionStrategy` +
//! `HandlerResolver` wired into one `RunOnce` poll loop (§4.4).

mod strategy;

pub use strategy::{DrainFirst, RoundRobin};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::time::Duration;

use relay_core::{
    ClaimedItem, HandlerResolver, OwnerToken, Result, SelectionStrategy, StoreProvider,
    WorkQueueStore,
};

/// What to do when a claimed item's topic has no registered handler. The
/// inbox wants dead-lettering (§4.4: "a missing handler for an inbox item is
/// a dead-letter condition, not a retry"); the outbox has no such carve-out,
/// so its dispatcher is configured with `Retry` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingHandlerPolicy {
    DeadLetter,
    Retry,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub lease: Duration,
    pub missing_handler_policy: MissingHandlerPolicy,
}

impl DispatcherConfig {
    pub fn new(lease: Duration, missing_handler_policy: MissingHandlerPolicy) -> Self {
        Self {
            lease,
            missing_handler_policy,
        }
    }
}

/// Drives `RunOnce` over a store set picked by a [`SelectionStrategy`] and
/// dispatched via a [`HandlerResolver`] (§4.4). Generic over the concrete
/// provider/strategy/resolver types rather than boxed trait objects — each
/// call site wires one concrete combination, so there is exactly one shape
/// per dispatcher instance (mirrors the teacher's preference for typed
/// interfaces over dynamic dispatch, §9).
pub struct Dispatcher<S, P, T, H>
where
    S: WorkQueueStore,
    P: StoreProvider<S>,
    T: SelectionStrategy<S>,
    H: HandlerResolver<S>,
{
    provider: P,
    strategy: T,
    resolver: H,
    config: DispatcherConfig,
    last_claimed: Mutex<Option<usize>>,
    _store: PhantomData<fn() -> S>,
}

impl<S, P, T, H> Dispatcher<S, P, T, H>
where
    S: WorkQueueStore,
    P: StoreProvider<S>,
    T: SelectionStrategy<S>,
    H: HandlerResolver<S>,
{
    pub fn new(provider: P, strategy: T, resolver: H, config: DispatcherConfig) -> Self {
        Self {
            provider,
            strategy,
            resolver,
            config,
            last_claimed: Mutex::new(None),
            _store: PhantomData,
        }
    }

    /// Claims one batch from the strategy-selected store, dispatches each
    /// item to its handler, and batches the resulting Ack/Fail/Abandon
    /// calls. Returns the number of items claimed this round.
    pub async fn run_once(&self, batch_size: u32) -> Result<usize> {
        let stores = self.provider.stores().await?;
        let last_claimed = *self.last_claimed.lock().expect("last_claimed poisoned");
        let Some(store) = self.strategy.select_next(&stores, last_claimed) else {
            return Ok(0);
        };

        let owner = OwnerToken::new();
        let claimed = store.claim(owner, self.config.lease, batch_size).await?;
        let claimed_count = claimed.len();
        *self.last_claimed.lock().expect("last_claimed poisoned") = Some(claimed_count);

        if claimed_count == 0 {
            return Ok(0);
        }

        let mut acked = Vec::new();
        let mut failed: HashMap<String, Vec<S::Id>> = HashMap::new();
        let mut abandoned: HashMap<String, Vec<S::Id>> = HashMap::new();

        for item in &claimed {
            self.dispatch_one(item, &mut acked, &mut failed, &mut abandoned)
                .await;
        }

        if !acked.is_empty() {
            store.ack(owner, &acked).await?;
        }
        for (message, ids) in failed {
            store.fail(owner, &ids, &message).await?;
        }
        for (message, ids) in abandoned {
            store.abandon(owner, &ids, Some(&message), None).await?;
        }

        tracing::info!(
            event = "relay.dispatcher.run_once",
            store = %store.identifier(),
            claimed = claimed_count,
            "dispatcher round complete"
        );

        Ok(claimed_count)
    }

    async fn dispatch_one(
        &self,
        item: &ClaimedItem<S::Id>,
        acked: &mut Vec<S::Id>,
        failed: &mut HashMap<String, Vec<S::Id>>,
        abandoned: &mut HashMap<String, Vec<S::Id>>,
    ) {
        match self.resolver.resolve(&item.topic) {
            // Panics inside `handle` unwind only this tokio task (§4.4,
            // SPEC_FULL §4.4): there is no `catch_unwind` here because a
            // handler future is run directly like any other Rust future.
            Some(handler) => match handler.handle(item).await {
                Ok(()) => acked.push(item.id.clone()),
                Err(error) => {
                    tracing::warn!(
                        event = "relay.dispatcher.handler_failure",
                        topic = %item.topic,
                        %error,
                        "handler failed, abandoning for retry"
                    );
                    abandoned
                        .entry(error.to_string())
                        .or_default()
                        .push(item.id.clone());
                }
            },
            None => {
                let message = format!("no handler registered for topic {:?}", item.topic);
                tracing::warn!(
                    event = "relay.dispatcher.no_handler",
                    topic = %item.topic,
                    "no handler registered for topic"
                );
                match self.config.missing_handler_policy {
                    MissingHandlerPolicy::DeadLetter => {
                        failed.entry(message).or_default().push(item.id.clone());
                    }
                    MissingHandlerPolicy::Retry => {
                        abandoned.entry(message).or_default().push(item.id.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use relay_core::{ClaimedItem, Handler, InstanceIdentifier};
    use relay_join::JoinStore;
    use relay_outbox::{migrate as migrate_outbox, Outbox, OutboxConfig};
    use relay_testkit::TestDb;

    use super::*;

    struct SingleStoreProvider(Arc<Outbox>);

    #[async_trait]
    impl StoreProvider<Outbox> for SingleStoreProvider {
        async fn stores(&self) -> Result<Vec<Arc<Outbox>>> {
            Ok(vec![self.0.clone()])
        }
    }

    struct OkHandler;
    #[async_trait]
    impl Handler<Outbox> for OkHandler {
        async fn handle(&self, _item: &ClaimedItem<relay_core::OutboxWorkItemIdentifier>) -> Result<()> {
            Ok(())
        }
    }

    struct BoomHandler;
    #[async_trait]
    impl Handler<Outbox> for BoomHandler {
        async fn handle(&self, _item: &ClaimedItem<relay_core::OutboxWorkItemIdentifier>) -> Result<()> {
            Err(relay_core::Error::HandlerFailure("boom".into()))
        }
    }

    struct TopicResolver;
    impl HandlerResolver<Outbox> for TopicResolver {
        fn resolve(&self, topic: &str) -> Option<Arc<dyn Handler<Outbox>>> {
            match topic {
                "ok" => Some(Arc::new(OkHandler)),
                "boom" => Some(Arc::new(BoomHandler)),
                _ => None,
            }
        }
    }

    async fn fixture() -> (TestDb, Arc<Outbox>) {
        let db = TestDb::new().await.expect("connect");
        migrate_outbox(&db.pool, db.schema()).await.expect("migrate outbox");
        let join_schema = db.extra_schema("join").await.expect("join schema");
        relay_join::migrate(&db.pool, &join_schema).await.expect("migrate join");
        let join = JoinStore::new(db.pool.clone(), join_schema).unwrap();
        let config = OutboxConfig::new(db.schema(), InstanceIdentifier::new());
        let outbox = Arc::new(Outbox::new(db.pool.clone(), join, config).unwrap());
        (db, outbox)
    }

    #[tokio::test]
    async fn successful_handler_acks_the_item() {
        let (_db, outbox) = fixture().await;
        outbox.enqueue("ok", "p", None, None, None).await.unwrap();

        let dispatcher = Dispatcher::new(
            SingleStoreProvider(outbox.clone()),
            RoundRobin::new(),
            TopicResolver,
            DispatcherConfig::new(Duration::from_secs(30), MissingHandlerPolicy::Retry),
        );

        let claimed = dispatcher.run_once(10).await.unwrap();
        assert_eq!(claimed, 1);

        // A second round claims nothing: the row is already Done.
        let second = dispatcher.run_once(10).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn failing_handler_abandons_for_retry() {
        let (_db, outbox) = fixture().await;
        outbox.enqueue("boom", "p", None, None, None).await.unwrap();

        let dispatcher = Dispatcher::new(
            SingleStoreProvider(outbox.clone()),
            RoundRobin::new(),
            TopicResolver,
            DispatcherConfig::new(Duration::from_secs(1), MissingHandlerPolicy::Retry),
        );

        assert_eq!(dispatcher.run_once(10).await.unwrap(), 1);

        // Abandon with no backoff clears `next_attempt_at`, so the row is
        // immediately claimable again.
        assert_eq!(dispatcher.run_once(10).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_handler_dead_letters_when_so_configured() {
        let (_db, outbox) = fixture().await;
        outbox.enqueue("unknown", "p", None, None, None).await.unwrap();

        let dispatcher = Dispatcher::new(
            SingleStoreProvider(outbox.clone()),
            RoundRobin::new(),
            TopicResolver,
            DispatcherConfig::new(Duration::from_secs(1), MissingHandlerPolicy::DeadLetter),
        );

        assert_eq!(dispatcher.run_once(10).await.unwrap(), 1);

        // Dead-lettered rows never come back.
        assert_eq!(dispatcher.run_once(10).await.unwrap(), 0);
    }
}
