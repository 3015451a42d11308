//! Shared primitives for Relay: identifier newtypes, the monotonic-clock
//! abstraction used by the lease runner, the error taxonomy, and the small
//! capability traits the multi-store dispatcher composes over.

pub mod clock;
pub mod error;
pub mod ids;
pub mod schema;
pub mod traits;

pub use clock::{FakeMonotonicClock, MonotonicClock, SystemMonotonicClock};
pub use error::{Error, Result};
pub use ids::{
    DatabaseIdentifier, InboxMessageIdentifier, InstanceIdentifier, JoinIdentifier,
    OutboxMessageIdentifier, OutboxWorkItemIdentifier, OwnerToken, MAX_INBOX_MESSAGE_ID_BYTES,
};
pub use schema::validate_schema_name;
pub use traits::{ClaimedItem, Handler, HandlerResolver, SelectionStrategy, StoreProvider, WorkQueueStore};
