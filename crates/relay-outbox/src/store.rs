use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{
    ClaimedItem, DatabaseIdentifier, Error, InstanceIdentifier, OutboxMessageIdentifier,
    OutboxWorkItemIdentifier, OwnerToken, Result, WorkQueueStore,
};
use relay_join::{JoinStore, MemberStatus};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const MIN_LEASE_SECONDS: u64 = 1;
const MAX_LEASE_SECONDS: u64 = 3600;
const MAX_BATCH_SIZE: u32 = 10_000;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Creates `schema` if missing and runs the outbox table into it. See
/// `relay_join::migrate` for the shared schema-qualified-migration shape.
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

/// Tunables an `Outbox` carries for itself (§6: each store takes a small
/// plain config struct rather than reaching into a generic DI/config layer).
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    pub schema: String,
    /// Identity recorded in `processed_by` when a row is failed
    /// (`"FAILED:<instance>"`, §4.1).
    pub instance: InstanceIdentifier,
    /// How long a `Done` row survives before cleanup deletes it.
    pub retention: Duration,
    pub cleanup_interval: Duration,
    /// Bound on opportunistically-reclaimed expired rows per `claim` call
    /// (§4.1 default 10).
    pub reclaim_batch: i64,
}

impl OutboxConfig {
    pub fn new(schema: impl Into<String>, instance: InstanceIdentifier) -> Self {
        Self {
            schema: schema.into(),
            instance,
            retention: Duration::from_secs(7 * 24 * 3600),
            cleanup_interval: Duration::from_secs(300),
            reclaim_batch: 10,
        }
    }
}

/// The Outbox store (C3): durable publish plus the C2 work-queue protocol
/// specialised to outbox rows, with join-member advancement folded into
/// `ack`/`fail` (§4.2, §4.8).
pub struct Outbox {
    pool: PgPool,
    join: JoinStore,
    config: OutboxConfig,
}

impl Outbox {
    pub fn new(pool: PgPool, join: JoinStore, config: OutboxConfig) -> Result<Self> {
        relay_core::validate_schema_name(&config.schema)?;
        Ok(Self { pool, join, config })
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    fn table(&self) -> String {
        format!("\"{}\".outbox", self.config.schema)
    }

    /// Durable publish. When `tx` is supplied the insert enlists in the
    /// caller's own transaction (the transactional-outbox contract: the
    /// message becomes durable iff the caller's write commits).
    pub async fn enqueue(
        &self,
        topic: &str,
        payload: &str,
        correlation_id: Option<&str>,
        due_time_utc: Option<DateTime<Utc>>,
        tx: Option<&mut Transaction<'_, Postgres>>,
    ) -> Result<OutboxMessageIdentifier> {
        let message_id = OutboxMessageIdentifier::new();
        let id = OutboxWorkItemIdentifier::new();
        let sql = format!(
            "INSERT INTO {} (id, message_id, topic, payload, correlation_id, due_time_utc) \
             VALUES ($1, $2, $3, $4, $5, $6)",
            self.table()
        );
        let query = sqlx::query(&sql)
            .bind(id.0)
            .bind(message_id.0)
            .bind(topic)
            .bind(payload)
            .bind(correlation_id)
            .bind(due_time_utc);
        match tx {
            Some(tx) => {
                query.execute(&mut **tx).await?;
            }
            None => {
                query.execute(&self.pool).await?;
            }
        }
        Ok(message_id)
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

    /// Periodic deletion of `Done` rows past the retention window (§4.2).
    /// Returns the number of rows removed.
    pub async fn cleanup_once(&self) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE status = 2 AND processed_at < now() - make_interval(secs => $1)",
            self.table()
        );
        let result = sqlx::query(&sql)
            .bind(self.config.retention.as_secs() as f64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl WorkQueueStore for Outbox {
    type Id = OutboxWorkItemIdentifier;

    fn identifier(&self) -> DatabaseIdentifier {
        // Stable per schema: the same schema name always yields the same
        // identifier, which is all C5's selection strategies need to tell
        // stores apart.
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
                 SELECT id, 0 AS priority, COALESCE(due_time_utc, created_at) AS due_key, created_at \
                 FROM {table} \
                 WHERE status = 0 \
                   AND (due_time_utc IS NULL OR due_time_utc <= now()) \
                   AND (next_attempt_at IS NULL OR next_attempt_at <= now()) \
             ), \
             reclaim_candidates AS ( \
                 SELECT id, 1 AS priority, COALESCE(due_time_utc, created_at) AS due_key, created_at \
                 FROM {table} \
                 WHERE status = 1 AND locked_until <= now() \
                 ORDER BY locked_until \
                 LIMIT $4 \
             ), \
             candidates AS ( \
                 SELECT * FROM ready_candidates \
                 UNION ALL \
                 SELECT * FROM reclaim_candidates \
             ), \
             picked AS ( \
                 SELECT o.id \
                 FROM {table} o \
                 JOIN candidates c ON c.id = o.id \
                 ORDER BY c.priority, c.due_key, c.created_at \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE {table} \
             SET status = 1, owner_token = $1, locked_until = now() + make_interval(secs => $2) \
             FROM picked \
             WHERE {table}.id = picked.id \
             RETURNING {table}.id, {table}.topic, {table}.payload",
            table = self.table()
        );

        let rows: Vec<(Uuid, String, String)> = sqlx::query_as(&sql)
            .bind(owner.0)
            .bind(lease.as_secs() as f64)
            .bind(batch_size as i64)
            .bind(self.config.reclaim_batch)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, topic, payload)| ClaimedItem {
                id: OutboxWorkItemIdentifier(id),
                topic,
                payload,
            })
            .collect())
    }

    async fn ack(&self, owner: OwnerToken, ids: &[Self::Id]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|i| i.0).collect();
        let sql = format!(
            "UPDATE {table} SET status = 2, is_processed = true, processed_at = now(), \
             owner_token = NULL, locked_until = NULL \
             WHERE id = ANY($1) AND status = 1 AND owner_token = $2 \
             RETURNING message_id",
            table = self.table()
        );

        let mut tx = self.pool.begin().await?;
        let message_ids: Vec<(Uuid,)> = sqlx::query_as(&sql)
            .bind(&raw_ids)
            .bind(owner.0)
            .fetch_all(&mut *tx)
            .await?;

        for (message_id,) in message_ids {
            self.join
                .increment_for_message_tx(
                    &mut tx,
                    OutboxMessageIdentifier(message_id),
                    MemberStatus::Completed,
                )
                .await?;
        }
        tx.commit().await?;
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
        let raw_ids: Vec<Uuid> = ids.iter().map(|i| i.0).collect();
        let sql = format!(
            "UPDATE {table} SET status = 0, retry_count = retry_count + 1, owner_token = NULL, \
             locked_until = NULL, last_error = $3, \
             next_attempt_at = CASE WHEN $4::double precision IS NULL THEN NULL \
                                    ELSE now() + make_interval(secs => $4) END \
             WHERE id = ANY($1) AND status = 1 AND owner_token = $2",
            table = self.table()
        );
        sqlx::query(&sql)
            .bind(&raw_ids)
            .bind(owner.0)
            .bind(last_error)
            .bind(delay.map(|d| d.as_secs() as f64))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail(&self, owner: OwnerToken, ids: &[Self::Id], last_error: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|i| i.0).collect();
        let processed_by = format!("FAILED:{}", self.config.instance);
        let sql = format!(
            "UPDATE {table} SET status = 3, owner_token = NULL, locked_until = NULL, \
             last_error = $3, processed_by = $4 \
             WHERE id = ANY($1) AND status = 1 AND owner_token = $2 \
             RETURNING message_id",
            table = self.table()
        );

        let mut tx = self.pool.begin().await?;
        let message_ids: Vec<(Uuid,)> = sqlx::query_as(&sql)
            .bind(&raw_ids)
            .bind(owner.0)
            .bind(last_error)
            .bind(&processed_by)
            .fetch_all(&mut *tx)
            .await?;

        for (message_id,) in message_ids {
            self.join
                .increment_for_message_tx(
                    &mut tx,
                    OutboxMessageIdentifier(message_id),
                    MemberStatus::Failed,
                )
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn reap_expired(&self, max_rows: u32) -> Result<u64> {
        let sql = format!(
            "WITH expired AS ( \
                 SELECT id FROM {table} WHERE status = 1 AND locked_until <= now() \
                 LIMIT $1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             UPDATE {table} SET status = 0, owner_token = NULL, locked_until = NULL \
             FROM expired WHERE {table}.id = expired.id",
            table = self.table()
        );
        let result = sqlx::query(&sql)
            .bind(max_rows as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
