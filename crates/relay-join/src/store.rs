use chrono::{DateTime, Utc};
use relay_core::{Error, JoinIdentifier, OutboxMessageIdentifier, Result};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::model::{Join, JoinStatus, MemberStatus};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Creates `schema` if missing and runs the join-barrier tables into it.
///
/// Grounded in the teacher's `harness/src/migrate.rs`, which runs an
/// embedded `sqlx::migrate!` Migrator against a dedicated pool per
/// component; Relay schema-qualifies instead of using separate databases
/// (§6), so migration additionally pins `search_path` before running.
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

#[derive(sqlx::FromRow)]
struct JoinRow {
    join_id: Uuid,
    tenant_id: i64,
    expected_steps: i32,
    completed_steps: i32,
    failed_steps: i32,
    status: i16,
    metadata: Option<String>,
    created_utc: DateTime<Utc>,
    last_updated_utc: DateTime<Utc>,
}

impl JoinRow {
    fn into_join(self) -> Result<Join> {
        Ok(Join {
            join_id: JoinIdentifier(self.join_id),
            tenant_id: self.tenant_id,
            expected_steps: self.expected_steps,
            completed_steps: self.completed_steps,
            failed_steps: self.failed_steps,
            status: JoinStatus::try_from(self.status)?,
            metadata: self.metadata,
            created_utc: self.created_utc,
            last_updated_utc: self.last_updated_utc,
        })
    }
}

const JOIN_COLUMNS: &str = "join_id, tenant_id, expected_steps, completed_steps, \
    failed_steps, status, metadata, created_utc, last_updated_utc";

/// Handle to a schema-qualified `join_barrier`/`join_member` pair (C8: the
/// Outbox Join barrier).
#[derive(Clone)]
pub struct JoinStore {
    pool: PgPool,
    schema: String,
}

impl JoinStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        relay_core::validate_schema_name(&schema)?;
        Ok(Self { pool, schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn table(&self, name: &str) -> String {
        format!("\"{}\".{name}", self.schema)
    }

    /// Registers a new barrier awaiting `expected_steps` member reports.
    pub async fn create_join(
        &self,
        tenant_id: i64,
        expected_steps: i32,
        metadata: Option<&str>,
    ) -> Result<Join> {
        if expected_steps < 0 {
            return Err(Error::invalid_argument("expected_steps must be >= 0"));
        }
        let join_id = JoinIdentifier::new();
        let row: JoinRow = sqlx::query_as(&format!(
            "INSERT INTO {} (join_id, tenant_id, expected_steps, metadata) \
             VALUES ($1, $2, $3, $4) RETURNING {JOIN_COLUMNS}",
            self.table("join_barrier")
        ))
        .bind(join_id.0)
        .bind(tenant_id)
        .bind(expected_steps)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        row.into_join()
    }

    /// Attaches an outbox message as a member of `join_id`. Idempotent:
    /// attaching the same pair twice is a no-op.
    pub async fn attach_message(
        &self,
        join_id: JoinIdentifier,
        outbox_message_id: OutboxMessageIdentifier,
    ) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (join_id, outbox_message_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
            self.table("join_member")
        ))
        .bind(join_id.0)
        .bind(outbox_message_id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_join(&self, join_id: JoinIdentifier) -> Result<Option<Join>> {
        let row: Option<JoinRow> = sqlx::query_as(&format!(
            "SELECT {JOIN_COLUMNS} FROM {} WHERE join_id = $1",
            self.table("join_barrier")
        ))
        .bind(join_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(JoinRow::into_join).transpose()
    }

    pub async fn get_join_messages(
        &self,
        join_id: JoinIdentifier,
    ) -> Result<Vec<OutboxMessageIdentifier>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT outbox_message_id FROM {} WHERE join_id = $1",
            self.table("join_member")
        ))
        .bind(join_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids
            .into_iter()
            .map(|(id,)| OutboxMessageIdentifier(id))
            .collect())
    }

    pub async fn update_status(&self, join_id: JoinIdentifier, status: JoinStatus) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET status = $2, last_updated_utc = now() WHERE join_id = $1",
            self.table("join_barrier")
        ))
        .bind(join_id.0)
        .bind(status as i16)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks every still-pending membership of `outbox_message_id` with
    /// `outcome` and bumps the owning barriers' counters, each in its own
    /// transaction. See [`Self::increment_for_message_tx`] for the
    /// transaction-scoped variant outbox Ack/Fail folds into their own write.
    pub async fn increment_completed_for_message(
        &self,
        outbox_message_id: OutboxMessageIdentifier,
    ) -> Result<Vec<Join>> {
        let mut tx = self.pool.begin().await?;
        let joins = self
            .increment_for_message_tx(&mut tx, outbox_message_id, MemberStatus::Completed)
            .await?;
        tx.commit().await?;
        Ok(joins)
    }

    pub async fn increment_failed_for_message(
        &self,
        outbox_message_id: OutboxMessageIdentifier,
    ) -> Result<Vec<Join>> {
        let mut tx = self.pool.begin().await?;
        let joins = self
            .increment_for_message_tx(&mut tx, outbox_message_id, MemberStatus::Failed)
            .await?;
        tx.commit().await?;
        Ok(joins)
    }

    /// A message can be a member of more than one join (no uniqueness
    /// constraint ties an outbox message to a single barrier), so this
    /// reports the outcome to every barrier that is still waiting on it
    /// (§4.8: "atomically call IncrementCompleted/IncrementFailed for every
    /// id that is a join member"). `FOR UPDATE` on the membership rows
    /// serializes concurrent reports for the same message.
    pub async fn increment_for_message_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        outbox_message_id: OutboxMessageIdentifier,
        outcome: MemberStatus,
    ) -> Result<Vec<Join>> {
        let pending_joins: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT join_id FROM {} WHERE outbox_message_id = $1 AND reported_status = 0 \
             FOR UPDATE",
            self.table("join_member")
        ))
        .bind(outbox_message_id.0)
        .fetch_all(&mut **tx)
        .await?;

        let column = match outcome {
            MemberStatus::Completed => "completed_steps",
            MemberStatus::Failed => "failed_steps",
            MemberStatus::Pending => {
                return Err(Error::invalid_argument(
                    "increment outcome must be Completed or Failed",
                ))
            }
        };

        let mut joins = Vec::with_capacity(pending_joins.len());
        for (join_id,) in pending_joins {
            sqlx::query(&format!(
                "UPDATE {} SET reported_status = $3 \
                 WHERE join_id = $1 AND outbox_message_id = $2",
                self.table("join_member")
            ))
            .bind(join_id)
            .bind(outbox_message_id.0)
            .bind(outcome as i16)
            .execute(&mut **tx)
            .await?;

            // Overflow protection (§4.7, §4.8): a barrier already at
            // `ExpectedSteps` silently drops further reports instead of
            // incrementing past it — the guard below, not the membership
            // lookup above, is what stops an over-attached join from
            // tripping the `CHECK (completed_steps + failed_steps <=
            // expected_steps)` constraint into the caller's ack/fail
            // transaction.
            let row: Option<JoinRow> = sqlx::query_as(&format!(
                "UPDATE {table} SET {column} = {column} + 1, last_updated_utc = now() \
                 WHERE join_id = $1 AND completed_steps + failed_steps < expected_steps \
                 RETURNING {JOIN_COLUMNS}",
                table = self.table("join_barrier"),
            ))
            .bind(join_id)
            .fetch_optional(&mut **tx)
            .await?;
            if let Some(row) = row {
                joins.push(row.into_join()?);
            }
        }
        Ok(joins)
    }
}
