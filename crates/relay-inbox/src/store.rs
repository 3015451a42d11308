use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    ClaimedItem, DatabaseIdentifier, Error, InboxMessageIdentifier, OwnerToken, Result,
    WorkQueueStore,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::InboxKey;

const MIN_LEASE_SECONDS: u64 = 1;
const MAX_LEASE_SECONDS: u64 = 3600;
const MAX_BATCH_SIZE: u32 = 10_000;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub async fn migrate(pool: &PgPool, schema: &str) -> Result<()> {
    relay_core::validate_schema_name(schema)?;
    let mut conn = pool.acquire().await?;
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("SET search_path TO \"{schema}\""))
        .execute(&mut *conn)
        .await?;
    MIGRATOR
        .run(&mut *conn)
        .await
        .map_err(|e| Error::invalid_argument(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub schema: String,
    pub retention: Duration,
    pub cleanup_interval: Duration,
    pub reclaim_batch: i64,
}

impl InboxConfig {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(300),
            reclaim_batch: 10,
        }
    }
}

/// The Inbox store (C4): dedup-on-ingest plus the C2 work-queue protocol
/// specialised to the `(MessageId, Source)` composite key.
pub struct Inbox {
    pool: PgPool,
    config: InboxConfig,
}

impl Inbox {
    pub fn new(pool: PgPool, config: InboxConfig) -> Result<Self> {
        relay_core::validate_schema_name(&config.schema)?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    fn table(&self) -> String {
        format!("\"{}\".inbox", self.config.schema)
    }

    /// Returns `true` iff `(message_id, source)` is already `Done`. Otherwise
    /// creates the row on first sight or touches `LastSeenUtc`/`Attempts`
    /// (§4.3). Concurrent first-sight callers still produce exactly one row,
    /// with `Attempts` reflecting every call (§8 property 7): the `ON
    /// CONFLICT ... DO UPDATE ... WHERE` guard means a conflicting `Done` row
    /// is left untouched and excluded from `RETURNING`, which is how a
    /// `None` result is told apart from "freshly inserted".
    pub async fn already_processed(
        &self,
        message_id: &InboxMessageIdentifier,
        source: &str,
        hash: Option<&[u8]>,
    ) -> Result<bool> {
        let sql = format!(
            "INSERT INTO {table} (message_id, source, hash, first_seen_utc, last_seen_utc, attempts, status) \
             VALUES ($1, $2, $3, now(), now(), 0, 'Seen') \
             ON CONFLICT (message_id, source) DO UPDATE \
                SET last_seen_utc = now(), attempts = {table}.attempts + 1 \
             WHERE {table}.status <> 'Done' \
             RETURNING status",
            table = self.table()
        );
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(message_id.as_str())
            .bind(source)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        // `None` only happens when the WHERE guard excluded an existing
        // `Done` row, i.e. the message was already fully processed.
        Ok(row.is_none())
    }

    /// Insert/merge for dispatcher-style consumption (§4.3), independent of
    /// the dedup-probe path above.
    pub async fn enqueue(
        &self,
        topic: &str,
        source: &str,
        message_id: &InboxMessageIdentifier,
        payload: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {table} (message_id, source, topic, payload, first_seen_utc, last_seen_utc, attempts, status) \
             VALUES ($1, $2, $3, $4, now(), now(), 0, 'Seen') \
             ON CONFLICT (message_id, source) DO UPDATE \
                SET topic = EXCLUDED.topic, payload = EXCLUDED.payload, last_seen_utc = now()",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(message_id.as_str())
            .bind(source)
            .bind(topic)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_processing(
        &self,
        message_id: &InboxMessageIdentifier,
        source: &str,
    ) -> Result<()> {
        self.set_status(message_id, source, "Processing").await
    }

    pub async fn mark_processed(
        &self,
        message_id: &InboxMessageIdentifier,
        source: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET status = 'Done', processed_utc = now() \
             WHERE message_id = $1 AND source = $2",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(message_id.as_str())
            .bind(source)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_dead(
        &self,
        message_id: &InboxMessageIdentifier,
        source: &str,
    ) -> Result<()> {
        self.set_status(message_id, source, "Dead").await
    }

    async fn set_status(
        &self,
        message_id: &InboxMessageIdentifier,
        source: &str,
        status: &str,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET status = $3 WHERE message_id = $1 AND source = $2",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(message_id.as_str())
            .bind(source)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn validate_claim_args(&self, lease: Duration, batch_size: u32) -> Result<()> {
        let lease_secs = lease.as_secs();
        if !(MIN_LEASE_SECONDS..=MAX_LEASE_SECONDS).contains(&lease_secs) {
            return Err(Error::invalid_argument(format!(
                "lease must be {MIN_LEASE_SECONDS}..={MAX_LEASE_SECONDS} seconds, got {lease_secs}"
            )));
        }
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(Error::invalid_argument(format!(
                "batch_size must be 1..={MAX_BATCH_SIZE}, got {batch_size}"
            )));
        }
        Ok(())
    }

    /// Periodic deletion of `Done`/`Dead` rows past the retention window.
    pub async fn cleanup_once(&self) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE status IN ('Done', 'Dead') \
             AND COALESCE(processed_utc, last_seen_utc) < now() - make_interval(secs => $1)",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(self.config.retention.as_secs() as f64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn split_keys(ids: &[InboxKey]) -> (Vec<String>, Vec<String>) {
    ids.iter()
        .map(|k| (k.message_id.as_str().to_owned(), k.source.clone()))
        .unzip()
}

#[async_trait]
impl WorkQueueStore for Inbox {
    type Id = InboxKey;

    fn identifier(&self) -> DatabaseIdentifier {
        DatabaseIdentifier(Uuid::new_v5(
            &Uuid::NAMESPACE_OID,
            self.config.schema.as_bytes(),
        ))
    }

    async fn claim(
        &self,
        owner: OwnerToken,
        lease: Duration,
        batch_size: u32,
    ) -> Result<Vec<ClaimedItem<Self::Id>>> {
        if owner.is_nil() {
            return Err(Error::invalid_argument("owner must be non-nil"));
        }
        self.validate_claim_args(lease, batch_size)?;

        let sql = format!(
            "WITH ready_candidates AS ( \
                 SELECT message_id, source, 0 AS priority, first_seen_utc \
                 FROM {table} WHERE status = 'Seen' \
             ), \
             reclaim_candidates AS ( \
                 SELECT message_id, source, 1 AS priority, first_seen_utc \
                 FROM {table} WHERE status = 'Processing' AND locked_until <= now() \
                 ORDER BY locked_until \
                 LIMIT $4 \
             ), \
             candidates AS ( \
                 SELECT * FROM ready_candidates UNION ALL SELECT * FROM reclaim_candidates \
             ), \
             picked AS ( \
                 SELECT i.message_id, i.source \
                 FROM {table} i \
                 JOIN candidates c ON c.message_id = i.message_id AND c.source = i.source \
                 ORDER BY c.priority, c.first_seen_utc \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE {table} \
             SET status = 'Processing', owner_token = $1, locked_until = now() + make_interval(secs => $2) \
             FROM picked \
             WHERE {table}.message_id = picked.message_id AND {table}.source = picked.source \
             RETURNING {table}.message_id, {table}.source, {table}.topic, {table}.payload",
            table = self.table()
        );

        let rows: Vec<(String, String, Option<String>, Option<String>)> = sqlx::query_as(&sql)
            .bind(owner.0)
            .bind(lease.as_secs() as f64)
            .bind(batch_size as i64)
            .bind(self.config.reclaim_batch)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(message_id, source, topic, payload)| {
                Ok(ClaimedItem {
                    id: InboxKey::new(InboxMessageIdentifier::new(message_id)?, source),
                    topic: topic.unwrap_or_default(),
                    payload: payload.unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn ack(&self, owner: OwnerToken, ids: &[Self::Id]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let (message_ids, sources) = split_keys(ids);
        let sql = format!(
            "UPDATE {table} SET status = 'Done', processed_utc = now(), owner_token = NULL, locked_until = NULL \
             FROM (SELECT unnest($1::text[]) AS message_id, unnest($2::text[]) AS source) AS ids \
             WHERE {table}.message_id = ids.message_id AND {table}.source = ids.source \
               AND {table}.status = 'Processing' AND {table}.owner_token = $3",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(&message_ids)
            .bind(&sources)
            .bind(owner.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn abandon(
        &self,
        owner: OwnerToken,
        ids: &[Self::Id],
        last_error: Option<&str>,
        delay: Option<Duration>,
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let (message_ids, sources) = split_keys(ids);
        let _ = last_error; // inbox rows carry no LastError column (§6 schema).
        let sql = format!(
            "UPDATE {table} SET status = 'Seen', attempts = {table}.attempts + 1, \
             owner_token = NULL, locked_until = NULL \
             FROM (SELECT unnest($1::text[]) AS message_id, unnest($2::text[]) AS source) AS ids \
             WHERE {table}.message_id = ids.message_id AND {table}.source = ids.source \
               AND {table}.status = 'Processing' AND {table}.owner_token = $3",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(&message_ids)
            .bind(&sources)
            .bind(owner.0)
            .execute(&self.pool)
            .await?;
        let _ = delay; // inbox has no NextAttemptAt column; retried on the next poll.
        Ok(())
    }

    async fn fail(&self, owner: OwnerToken, ids: &[Self::Id], _last_error: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let (message_ids, sources) = split_keys(ids);
        let sql = format!(
            "UPDATE {table} SET status = 'Dead', owner_token = NULL, locked_until = NULL, processed_utc = now() \
             FROM (SELECT unnest($1::text[]) AS message_id, unnest($2::text[]) AS source) AS ids \
             WHERE {table}.message_id = ids.message_id AND {table}.source = ids.source \
               AND {table}.status = 'Processing' AND {table}.owner_token = $3",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(&message_ids)
            .bind(&sources)
            .bind(owner.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reap_expired(&self, max_rows: u32) -> Result<u64> {
        let sql = format!(
            "WITH expired AS ( \
                 SELECT message_id, source FROM {table} \
                 WHERE status = 'Processing' AND locked_until <= now() \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE {table} SET status = 'Seen', owner_token = NULL, locked_until = NULL \
             FROM expired \
             WHERE {table}.message_id = expired.message_id AND {table}.source = expired.source",
            table = self.table()
        );
        let result = sqlx::query(&sql)
            .bind(max_rows as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
