//! The Inbox store (C4): dedup-on-ingest plus the C2 work-queue protocol
//! specialised to the `(MessageId, Source)` composite key.

mod cleanup;
mod model;
mod store;

pub use cleanup::cleanup_loop;
pub use model::{InboxKey, InboxStatus};
pub use store::{migrate, Inbox, InboxConfig};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{InboxMessageIdentifier, OwnerToken, WorkQueueStore};
    use relay_testkit::TestDb;

    use super::*;

    async fn inbox() -> (TestDb, Inbox) {
        let db = TestDb::new().await.expect("connect");
        migrate(&db.pool, db.schema()).await.expect("migrate");
        let config = InboxConfig::new(db.schema());
        let inbox = Inbox::new(db.pool.clone(), config).unwrap();
        (db, inbox)
    }

    #[tokio::test]
    async fn already_processed_is_false_until_marked_done() {
        let (_db, inbox) = inbox().await;
        let msg = InboxMessageIdentifier::new("m1").unwrap();

        assert!(!inbox.already_processed(&msg, "s1", None).await.unwrap());
        assert!(!inbox.already_processed(&msg, "s1", None).await.unwrap());

        inbox.mark_processed(&msg, "s1").await.unwrap();
        assert!(inbox.already_processed(&msg, "s1", None).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_first_sight_creates_exactly_one_row_with_every_call_counted() {
        let (db, inbox) = inbox().await;
        let msg = InboxMessageIdentifier::new("dup").unwrap();

        let inbox = std::sync::Arc::new(inbox);
        let n = 12;
        relay_testkit::run_concurrently(n, {
            let inbox = inbox.clone();
            let msg = msg.clone();
            move |_| {
                let inbox = inbox.clone();
                let msg = msg.clone();
                async move {
                    inbox.already_processed(&msg, "s", None).await.unwrap();
                }
            }
        })
        .await;

        let row: (i32,) = sqlx::query_as(&format!(
            "SELECT attempts FROM \"{}\".inbox WHERE message_id = $1 AND source = 's'",
            db.schema()
        ))
        .bind(msg.as_str())
        .fetch_one(&db.pool)
        .await
        .unwrap();
        assert_eq!(row.0 as usize, n - 1);
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_concurrency() {
        let (_db, inbox) = inbox().await;
        for i in 0..20 {
            inbox
                .enqueue("t", "src", &InboxMessageIdentifier::new(format!("m{i}")).unwrap(), "p")
                .await
                .unwrap();
        }

        let inbox = std::sync::Arc::new(inbox);
        let results = relay_testkit::run_concurrently(10, {
            let inbox = inbox.clone();
            move |_| {
                let inbox = inbox.clone();
                async move {
                    inbox
                        .claim(OwnerToken::new(), Duration::from_secs(30), 5)
                        .await
                        .unwrap()
                }
            }
        })
        .await;

        let mut seen = std::collections::HashSet::new();
        let mut total = 0;
        for batch in results {
            for item in batch {
                total += 1;
                assert!(seen.insert(item.id), "row claimed twice");
            }
        }
        assert_eq!(total, 20);
    }

    #[tokio::test]
    async fn no_handler_dead_letters_via_fail() {
        let (_db, inbox) = inbox().await;
        let msg = InboxMessageIdentifier::new("poison").unwrap();
        inbox.enqueue("unknown", "s", &msg, "p").await.unwrap();

        let owner = OwnerToken::new();
        let claimed = inbox
            .claim(owner, Duration::from_secs(30), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        inbox
            .fail(owner, &[claimed[0].id.clone()], "no handler for topic")
            .await
            .unwrap();

        assert!(!inbox.already_processed(&msg, "s", None).await.unwrap());
    }
}
