use chrono::{DateTime, Utc};
use relay_core::{Error, Result};
use uuid::Uuid;

const MAX_NAME_BYTES: usize = 200;

/// Semaphore names are a wider alphabet than schema identifiers (§4.5):
/// `[A-Za-z0-9._:/\-]`, up to 200 bytes, used as opaque keys rather than
/// interpolated into SQL, so no leading-character restriction applies.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return Err(Error::invalid_argument(format!(
            "semaphore name must be 1..={MAX_NAME_BYTES} bytes, got {} bytes",
            name.len()
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'));
    if !valid {
        return Err(Error::invalid_argument(
            "semaphore name must contain only [A-Za-z0-9._:/-]",
        ));
    }
    Ok(())
}

pub fn validate_limit(limit: i32, max_limit: i32) -> Result<()> {
    if limit < 1 || limit > max_limit {
        return Err(Error::invalid_argument(format!(
            "limit must be in 1..={max_limit}, got {limit}"
        )));
    }
    Ok(())
}

pub fn validate_ttl_seconds(ttl_seconds: f64, min_ttl: f64, max_ttl: f64) -> Result<()> {
    if !(min_ttl..=max_ttl).contains(&ttl_seconds) {
        return Err(Error::invalid_argument(format!(
            "ttl must be in {min_ttl}..={max_ttl} seconds, got {ttl_seconds}"
        )));
    }
    Ok(())
}

/// §7: `NotAcquired`/`Lost`/`NotFound` are result variants, never exceptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        token: Uuid,
        fencing: i64,
        expires_at_utc: DateTime<Utc>,
    },
    NotAcquired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewOutcome {
    Renewed { expires_at_utc: DateTime<Utc> },
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotFound,
}
