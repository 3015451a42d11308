//! The Outbox store (C3): transactional publish plus the C2 work-queue
//! protocol specialised to outbound messages, with join-member advancement
//! folded into `ack`/`fail` (§4.8).

mod cleanup;
mod join_wait;
mod model;
mod store;

pub use cleanup::cleanup_loop;
pub use join_wait::{JoinWaitHandler, JoinWaitPayload, JOIN_WAIT_TOPIC};
pub use model::OutboxStatus;
pub use store::{migrate, Outbox, OutboxConfig};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{InstanceIdentifier, OwnerToken, WorkQueueStore};
    use relay_join::JoinStore;
    use relay_testkit::TestDb;

    use super::*;

    async fn outbox() -> (TestDb, JoinStore, Outbox) {
        let db = TestDb::new().await.expect("connect");
        migrate(&db.pool, db.schema()).await.expect("migrate outbox");
        let join_schema = db.extra_schema("join").await.expect("join schema");
        relay_join::migrate(&db.pool, &join_schema)
            .await
            .expect("migrate join");
        let join = JoinStore::new(db.pool.clone(), join_schema).unwrap();
        let config = OutboxConfig::new(db.schema(), InstanceIdentifier::new());
        let outbox = Outbox::new(db.pool.clone(), join.clone(), config).unwrap();
        (db, join, outbox)
    }

    #[tokio::test]
    async fn round_trip_enqueue_claim_ack() {
        let (_db, _join, outbox) = outbox().await;
        outbox
            .enqueue("t", "p1", None, None, None)
            .await
            .unwrap();

        let owner = OwnerToken::new();
        let claimed = outbox
            .claim(owner, Duration::from_secs(30), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].topic, "t");
        assert_eq!(claimed[0].payload, "p1");

        outbox
            .ack(owner, &[claimed[0].id])
            .await
            .unwrap();

        // Already acked: a second claim sees nothing left to pick up.
        let claimed_again = outbox
            .claim(OwnerToken::new(), Duration::from_secs(30), 10)
            .await
            .unwrap();
        assert!(claimed_again.is_empty());
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_concurrency() {
        let (_db, _join, outbox) = outbox().await;
        for i in 0..20 {
            outbox
                .enqueue("t", &format!("p{i}"), None, None, None)
                .await
                .unwrap();
        }

        let outbox = std::sync::Arc::new(outbox);
        let results = relay_testkit::run_concurrently(10, {
            let outbox = outbox.clone();
            move |_| {
                let outbox = outbox.clone();
                async move {
                    outbox
                        .claim(OwnerToken::new(), Duration::from_secs(30), 5)
                        .await
                        .unwrap()
                }
            }
        })
        .await;

        let mut all_ids = std::collections::HashSet::new();
        let mut total = 0;
        for batch in results {
            for item in batch {
                total += 1;
                assert!(all_ids.insert(item.id.0), "row claimed twice: {:?}", item.id);
            }
        }
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn abandon_returns_row_to_ready_with_backoff() {
        let (_db, _join, outbox) = outbox().await;
        outbox.enqueue("t", "p", None, None, None).await.unwrap();
        let owner = OwnerToken::new();
        let claimed = outbox
            .claim(owner, Duration::from_secs(30), 1)
            .await
            .unwrap();

        outbox
            .abandon(owner, &[claimed[0].id], Some("boom"), Some(Duration::from_secs(3600)))
            .await
            .unwrap();

        // Still due an hour from now, so an immediate claim sees nothing.
        let immediate = outbox
            .claim(OwnerToken::new(), Duration::from_secs(30), 1)
            .await
            .unwrap();
        assert!(immediate.is_empty());
    }

    #[tokio::test]
    async fn owner_mismatch_is_a_silent_no_op() {
        let (_db, _join, outbox) = outbox().await;
        outbox.enqueue("t", "p", None, None, None).await.unwrap();
        let owner = OwnerToken::new();
        let claimed = outbox
            .claim(owner, Duration::from_secs(30), 1)
            .await
            .unwrap();

        outbox
            .ack(OwnerToken::new(), &[claimed[0].id])
            .await
            .unwrap();

        // The row is still held by the real owner, unaffected by the
        // mismatched ack.
        let reaped = outbox.reap_expired(100).await.unwrap();
        assert_eq!(reaped, 0);
    }

    #[tokio::test]
    async fn fail_terminalises_a_join_member() {
        let (_db, join, outbox) = outbox().await;
        let barrier = join.create_join(1, 1, None).await.unwrap();

        let message_id = outbox
            .enqueue("t", "p", None, None, None)
            .await
            .unwrap();
        join.attach_message(barrier.join_id, message_id)
            .await
            .unwrap();

        let owner = OwnerToken::new();
        let claimed = outbox
            .claim(owner, Duration::from_secs(30), 1)
            .await
            .unwrap();
        outbox
            .fail(owner, &[claimed[0].id], "handler exploded")
            .await
            .unwrap();

        let barrier = join.get_join(barrier.join_id).await.unwrap().unwrap();
        assert_eq!(barrier.failed_steps, 1);
        assert!(barrier.is_ready());
    }
}
