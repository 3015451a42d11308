//! Capability traits shared by the work-queue protocol (C2) and the
//! multi-store dispatcher (C5). Kept as small, separately-composable
//! interfaces per §9 ("Dynamic dispatch → typed interfaces with tagged
//! variants"), mirroring the teacher's `trace_core::{Queue, ObjectStore,
//! Signer}` traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::{DatabaseIdentifier, OwnerToken, Result};

/// One row claimed off a work-queue-governed store (§4.1).
#[derive(Debug, Clone)]
pub struct ClaimedItem<Id> {
    pub id: Id,
    pub topic: String,
    pub payload: String,
}

/// The C2 protocol, specialised by each store to its own row shape.
///
/// Outbox and inbox each implement this directly against their own table
/// rather than sharing one generic SQL layer (§4.2, §4.3): the row shapes
/// (`Status` enum vs. string, `Uuid` vs. composite `(MessageId, Source)` key)
/// differ enough that a shared query builder would buy nothing the teacher's
/// own per-table `PgQueue`/`state.tasks` handling doesn't already show is
/// unnecessary.
#[async_trait]
pub trait WorkQueueStore: Send + Sync + 'static {
    type Id: Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Stable identifier for this store instance, used by C5's selection
    /// strategies and logging to tell stores apart.
    fn identifier(&self) -> DatabaseIdentifier;

    async fn claim(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: u32,
    ) -> Result<Vec<ClaimedItem<Self::Id>>>;

    async fn ack(&self, owner: OwnerToken, ids: &[Self::Id]) -> Result<()>;

    async fn abandon(
        &self,
        owner: OwnerToken,
        ids: &[Self::Id],
        last_error: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<()>;

    async fn fail(&self, owner: OwnerToken, ids: &[Self::Id], last_error: &str) -> Result<()>;

    async fn reap_expired(&self, max_rows: u32) -> Result<u64>;
}

/// Returns the current set of stores a dispatcher should consider (§4.4).
#[async_trait]
pub trait StoreProvider<S: WorkQueueStore>: Send + Sync {
    async fn stores(&self) -> Result<Vec<Arc<S>>>;
}

/// Picks the next store to claim from (§4.4: round-robin or drain-first).
pub trait SelectionStrategy<S: WorkQueueStore>: Send + Sync {
    /// `last_claimed` is the count returned by the previous claim against the
    /// currently-selected store (`None` on the very first call, or after the
    /// store set changes shape). Round-robin ignores it and always advances;
    /// drain-first sticks with the current store until it yields zero.
    fn select_next(&self, stores: &[Arc<S>], last_claimed: Option<usize>) -> Option<Arc<S>>;
}

/// Resolves a topic to its handler (§4.4).
pub trait HandlerResolver<S: WorkQueueStore>: Send + Sync {
    fn resolve(&self, topic: &str) -> Option<Arc<dyn Handler<S>>>;
}

/// Domain handler invoked once per claimed item.
#[async_trait]
pub trait Handler<S: WorkQueueStore>: Send + Sync {
    async fn handle(&self, item: &ClaimedItem<S::Id>) -> Result<()>;
}
