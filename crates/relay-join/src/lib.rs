//! The Outbox Join barrier (C8): a many-to-one fan-in counter that lets a
//! caller enqueue N outbox messages and be notified, via a normal outbox
//! topic handler, once every one of them has reached a terminal state.

mod model;
mod store;

pub use model::{Join, JoinStatus, MemberStatus};
pub use store::{migrate, JoinStore};
