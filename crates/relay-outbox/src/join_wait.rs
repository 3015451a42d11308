use async_trait::async_trait;
use relay_core::{ClaimedItem, Error, JoinIdentifier, OutboxWorkItemIdentifier, Result};
use relay_join::{JoinStatus, JoinStore};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};

use crate::Outbox;

pub const JOIN_WAIT_TOPIC: &str = "join.wait";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinWaitPayload {
    pub join_id: JoinIdentifier,
    pub fail_if_any_step_failed: bool,
    pub on_complete_topic: Option<String>,
    pub on_complete_payload: Option<String>,
    pub on_fail_topic: Option<String>,
    pub on_fail_payload: Option<String>,
}

impl Outbox {
    /// Publishes a `join.wait` message that [`JoinWaitHandler`] polls until
    /// `join_id`'s barrier is ready (§4.2, §4.7).
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue_join_wait(
        &self,
        join_id: JoinIdentifier,
        fail_if_any_step_failed: bool,
        on_complete_topic: Option<&str>,
        on_complete_payload: Option<&str>,
        on_fail_topic: Option<&str>,
        on_fail_payload: Option<&str>,
        tx: Option<&mut Transaction<'_, Postgres>>,
    ) -> Result<()> {
        let payload = JoinWaitPayload {
            join_id,
            fail_if_any_step_failed,
            on_complete_topic: on_complete_topic.map(str::to_owned),
            on_complete_payload: on_complete_payload.map(str::to_owned),
            on_fail_topic: on_fail_topic.map(str::to_owned),
            on_fail_payload: on_fail_payload.map(str::to_owned),
        };
        let serialized = serde_json::to_string(&payload)?;
        self.enqueue(JOIN_WAIT_TOPIC, &serialized, None, None, tx)
            .await?;
        Ok(())
    }
}

/// Implements the `join.wait` topic (§4.7): waits for a barrier to become
/// ready, terminalises it, and optionally enqueues a follow-up message.
///
/// Lives alongside `Outbox` rather than in `relay-join` itself so Join never
/// depends back on Outbox (§9: "Cyclic references are avoided... the
/// `join.wait` handler is a normal topic handler and consumes the outbox API
/// as any other caller would"); a dispatcher driving an `Outbox` registers
/// this the same way it registers any other topic handler.
pub struct JoinWaitHandler {
    join: JoinStore,
    outbox: std::sync::Arc<Outbox>,
}

impl JoinWaitHandler {
    pub fn new(join: JoinStore, outbox: std::sync::Arc<Outbox>) -> Self {
        Self { join, outbox }
    }

    pub async fn run(&self, payload: &str) -> Result<()> {
        let spec: JoinWaitPayload = serde_json::from_str(payload)?;
        let join = self
            .join
            .get_join(spec.join_id)
            .await?
            .ok_or_else(|| Error::invalid_argument(format!("unknown join {}", spec.join_id)))?;

        if join.status != JoinStatus::Pending {
            // Already terminalised by an earlier delivery of this message.
            return Ok(());
        }
        if !join.is_ready() {
            return Err(Error::JoinNotReady {
                join_id: spec.join_id,
            });
        }

        let failed = spec.fail_if_any_step_failed && join.failed_steps > 0;
        self.join
            .update_status(
                spec.join_id,
                if failed {
                    JoinStatus::Failed
                } else {
                    JoinStatus::Completed
                },
            )
            .await?;

        let (topic, payload) = if failed {
            (spec.on_fail_topic, spec.on_fail_payload)
        } else {
            (spec.on_complete_topic, spec.on_complete_payload)
        };
        if let Some(topic) = topic {
            self.outbox
                .enqueue(&topic, payload.as_deref().unwrap_or(""), None, None, None)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl relay_core::Handler<Outbox> for JoinWaitHandler {
    async fn handle(&self, item: &ClaimedItem<OutboxWorkItemIdentifier>) -> Result<()> {
        self.run(&item.payload).await
    }
}
