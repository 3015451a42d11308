use chrono::{DateTime, Utc};
use relay_core::{Error, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::model::{
    validate_limit, validate_name, validate_ttl_seconds, AcquireOutcome, ReleaseOutcome,
    RenewOutcome,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const DEFAULT_MAX_LIMIT: i32 = 10_000;
const DEFAULT_MIN_TTL_SECONDS: f64 = 1.0;
const DEFAULT_MAX_TTL_SECONDS: f64 = 86_400.0;
const DEFAULT_REAP_BATCH: i64 = 10;

/// Creates `schema` if missing and runs the semaphore tables into it. Same
/// shape as `relay_join::migrate` and `relay_outbox::store::migrate`.
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
pub struct SemaphoreConfig {
    pub schema: String,
    pub max_limit: i32,
    pub min_ttl_seconds: f64,
    pub max_ttl_seconds: f64,
    pub reap_batch: i64,
}

impl SemaphoreConfig {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            max_limit: DEFAULT_MAX_LIMIT,
            min_ttl_seconds: DEFAULT_MIN_TTL_SECONDS,
            max_ttl_seconds: DEFAULT_MAX_TTL_SECONDS,
            reap_batch: DEFAULT_REAP_BATCH,
        }
    }
}

/// Handle to a schema-qualified `semaphore`/`semaphore_lease` pair (C6: the
/// distributed bounded semaphore with fencing).
#[derive(Clone)]
pub struct Semaphore {
    pool: PgPool,
    config: SemaphoreConfig,
}

impl Semaphore {
    pub fn new(pool: PgPool, config: SemaphoreConfig) -> Result<Self> {
        relay_core::validate_schema_name(&config.schema)?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.config
    }

    fn table(&self, name: &str) -> String {
        format!("\"{}\".{name}", self.config.schema)
    }

    pub async fn ensure_exists(&self, name: &str, limit: i32) -> Result<()> {
        validate_name(name)?;
        validate_limit(limit, self.config.max_limit)?;
        sqlx::query(&format!(
            "INSERT INTO {} (name, \"limit\", fencing_next) VALUES ($1, $2, 1) \
             ON CONFLICT (name) DO UPDATE SET \"limit\" = $2",
            self.table("semaphore")
        ))
        .bind(name)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_limit(
        &self,
        name: &str,
        new_limit: i32,
        ensure_if_missing: bool,
    ) -> Result<()> {
        validate_name(name)?;
        validate_limit(new_limit, self.config.max_limit)?;
        if ensure_if_missing {
            return self.ensure_exists(name, new_limit).await;
        }
        sqlx::query(&format!(
            "UPDATE {} SET \"limit\" = $2 WHERE name = $1",
            self.table("semaphore")
        ))
        .bind(name)
        .bind(new_limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn try_acquire(
        &self,
        name: &str,
        ttl_seconds: f64,
        owner_id: &str,
        client_request_id: Option<&str>,
    ) -> Result<AcquireOutcome> {
        validate_name(name)?;
        validate_ttl_seconds(
            ttl_seconds,
            self.config.min_ttl_seconds,
            self.config.max_ttl_seconds,
        )?;

        let mut tx = self.pool.begin().await?;

        let semaphore: Option<(i32,)> = sqlx::query_as(&format!(
            "SELECT \"limit\" FROM {} WHERE name = $1 FOR UPDATE",
            self.table("semaphore")
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((limit,)) = semaphore else {
            tx.commit().await?;
            return Ok(AcquireOutcome::NotAcquired);
        };

        sqlx::query(&format!(
            "DELETE FROM {} WHERE name = $1 AND ctid IN ( \
                 SELECT ctid FROM {} WHERE name = $1 AND expires_at_utc <= now() \
                 LIMIT $2 FOR UPDATE SKIP LOCKED)",
            self.table("semaphore_lease"),
            self.table("semaphore_lease"),
        ))
        .bind(name)
        .bind(self.config.reap_batch)
        .execute(&mut *tx)
        .await?;

        if let Some(client_request_id) = client_request_id {
            let existing: Option<(Uuid, i64, DateTime<Utc>)> = sqlx::query_as(&format!(
                "SELECT token, fencing, expires_at_utc FROM {} \
                 WHERE name = $1 AND client_request_id = $2 AND expires_at_utc > now()",
                self.table("semaphore_lease")
            ))
            .bind(name)
            .bind(client_request_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some((token, fencing, expires_at_utc)) = existing {
                tx.commit().await?;
                return Ok(AcquireOutcome::Acquired {
                    token,
                    fencing,
                    expires_at_utc,
                });
            }
        }

        let (active_count,): (i64,) = sqlx::query_as(&format!(
            "SELECT count(*) FROM {} WHERE name = $1 AND expires_at_utc > now()",
            self.table("semaphore_lease")
        ))
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        if active_count >= limit as i64 {
            tx.commit().await?;
            return Ok(AcquireOutcome::NotAcquired);
        }

        let (fencing,): (i64,) = sqlx::query_as(&format!(
            "UPDATE {} SET fencing_next = fencing_next + 1 WHERE name = $1 \
             RETURNING fencing_next",
            self.table("semaphore")
        ))
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;

        let token = Uuid::new_v4();
        let (expires_at_utc,): (DateTime<Utc>,) = sqlx::query_as(&format!(
            "INSERT INTO {} (name, token, owner_id, client_request_id, expires_at_utc, fencing) \
             VALUES ($1, $2, $3, $4, now() + make_interval(secs => $5), $6) \
             RETURNING expires_at_utc",
            self.table("semaphore_lease")
        ))
        .bind(name)
        .bind(token)
        .bind(owner_id)
        .bind(client_request_id)
        .bind(ttl_seconds)
        .bind(fencing)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AcquireOutcome::Acquired {
            token,
            fencing,
            expires_at_utc,
        })
    }

    pub async fn renew(&self, name: &str, token: Uuid, ttl_seconds: f64) -> Result<RenewOutcome> {
        validate_name(name)?;
        validate_ttl_seconds(
            ttl_seconds,
            self.config.min_ttl_seconds,
            self.config.max_ttl_seconds,
        )?;
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(&format!(
            "UPDATE {} SET expires_at_utc = GREATEST(expires_at_utc, now() + make_interval(secs => $3)) \
             WHERE name = $1 AND token = $2 AND expires_at_utc > now() \
             RETURNING expires_at_utc",
            self.table("semaphore_lease")
        ))
        .bind(name)
        .bind(token)
        .bind(ttl_seconds)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some((expires_at_utc,)) => RenewOutcome::Renewed { expires_at_utc },
            None => RenewOutcome::Lost,
        })
    }

    pub async fn release(&self, name: &str, token: Uuid) -> Result<ReleaseOutcome> {
        validate_name(name)?;
        let row: Option<(Uuid,)> = sqlx::query_as(&format!(
            "DELETE FROM {} WHERE name = $1 AND token = $2 RETURNING token",
            self.table("semaphore_lease")
        ))
        .bind(name)
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(_) => ReleaseOutcome::Released,
            None => ReleaseOutcome::NotFound,
        })
    }

    pub async fn reap_expired(&self, name: &str, max_rows: i64) -> Result<u64> {
        validate_name(name)?;
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE name = $1 AND ctid IN ( \
                 SELECT ctid FROM {} WHERE name = $1 AND expires_at_utc <= now() \
                 LIMIT $2 FOR UPDATE SKIP LOCKED)",
            self.table("semaphore_lease"),
            self.table("semaphore_lease"),
        ))
        .bind(name)
        .bind(max_rows)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
