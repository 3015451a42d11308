use std::time::Duration;

use chrono::{DateTime, Utc};
use relay_core::Result;
use sqlx::PgPool;

use crate::model::{validate_name, AcquiredLease, ReleaseOutcome, RenewOutcome};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Creates `schema` if missing and runs the lease table into it. Same shape
/// as `relay_join::migrate`/`relay_semaphore::store::migrate`.
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
        .map_err(|e| relay_core::Error::invalid_argument(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct LeaseConfig {
    pub schema: String,
}

impl LeaseConfig {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }
}

/// Handle to a schema-qualified `lease` table (C7's row state — `Name`,
/// `Owner`, `ExpiresAt`, `Epoch`). [`crate::Runner`] is the caller-facing
/// self-renewing wrapper built on top of this store.
#[derive(Clone)]
pub struct LeaseStore {
    pool: PgPool,
    config: LeaseConfig,
}

impl LeaseStore {
    pub fn new(pool: PgPool, config: LeaseConfig) -> Result<Self> {
        relay_core::validate_schema_name(&config.schema)?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    fn table(&self) -> String {
        format!("\"{}\".lease", self.config.schema)
    }

    /// Attempts to acquire `name` for `owner`. Returns `None` if another
    /// owner holds a still-unexpired lease. Every successful acquisition —
    /// whether the row was missing, expired, or already held by `owner` —
    /// bumps `epoch` (§3: "bumped on each successful acquisition").
    pub async fn acquire(
        &self,
        name: &str,
        owner: &str,
        duration: Duration,
    ) -> Result<Option<AcquiredLease>> {
        validate_name(name)?;
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String, i64, DateTime<Utc>)> = sqlx::query_as(&format!(
            "SELECT owner, epoch, expires_at_utc FROM {} WHERE name = $1 FOR UPDATE",
            self.table()
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((current_owner, _, expires_at_utc)) = &existing {
            if expires_at_utc > &Utc::now() && current_owner != owner {
                tx.commit().await?;
                return Ok(None);
            }
        }

        let ttl_secs = duration.as_secs_f64();
        let row: (i64, DateTime<Utc>) = if existing.is_some() {
            sqlx::query_as(&format!(
                "UPDATE {} SET owner = $2, epoch = epoch + 1, \
                 expires_at_utc = now() + make_interval(secs => $3) \
                 WHERE name = $1 RETURNING epoch, expires_at_utc",
                self.table()
            ))
            .bind(name)
            .bind(owner)
            .bind(ttl_secs)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as(&format!(
                "INSERT INTO {} (name, owner, epoch, expires_at_utc) \
                 VALUES ($1, $2, 1, now() + make_interval(secs => $3)) \
                 RETURNING epoch, expires_at_utc",
                self.table()
            ))
            .bind(name)
            .bind(owner)
            .bind(ttl_secs)
            .fetch_one(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(Some(AcquiredLease {
            epoch: row.0,
            expires_at_utc: row.1,
        }))
    }

    /// Monotonic: `ExpiresAtUtc` never moves backwards.
    pub async fn renew(&self, name: &str, epoch: i64, duration: Duration) -> Result<RenewOutcome> {
        validate_name(name)?;
        let row: Option<(DateTime<Utc>,)> = sqlx::query_as(&format!(
            "UPDATE {} SET expires_at_utc = GREATEST(expires_at_utc, now() + make_interval(secs => $3)) \
             WHERE name = $1 AND epoch = $2 AND expires_at_utc > now() \
             RETURNING expires_at_utc",
            self.table()
        ))
        .bind(name)
        .bind(epoch)
        .bind(duration.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some((expires_at_utc,)) => RenewOutcome::Renewed { expires_at_utc },
            None => RenewOutcome::Lost,
        })
    }

    pub async fn release(&self, name: &str, epoch: i64) -> Result<ReleaseOutcome> {
        validate_name(name)?;
        let row: Option<(String,)> = sqlx::query_as(&format!(
            "DELETE FROM {} WHERE name = $1 AND epoch = $2 RETURNING name",
            self.table()
        ))
        .bind(name)
        .bind(epoch)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(_) => ReleaseOutcome::Released,
            None => ReleaseOutcome::NotFound,
        })
    }

    /// Administrative deletion of rows whose lease expired and was never
    /// reacquired (`Lock_CleanupExpired`, §6).
    pub async fn cleanup_expired(&self, max_rows: i64) -> Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE name IN ( \
                 SELECT name FROM {} WHERE expires_at_utc <= now() \
                 LIMIT $1 FOR UPDATE SKIP LOCKED)",
            self.table(),
            self.table(),
        ))
        .bind(max_rows)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
