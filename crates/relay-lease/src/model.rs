use chrono::{DateTime, Utc};
use relay_core::{Error, Result};

const MAX_NAME_BYTES: usize = 200;

/// A named-lease name (C7, distinct from the semaphore rows of C6 — §9: the
/// two "Lease" concepts share no rows or tokens). Same alphabet as semaphore
/// names since both are opaque keys rather than SQL identifiers.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_BYTES {
        return Err(Error::invalid_argument(format!(
            "lease name must be 1..={MAX_NAME_BYTES} bytes, got {} bytes",
            name.len()
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'));
    if !valid {
        return Err(Error::invalid_argument(
            "lease name must contain only [A-Za-z0-9._:/-]",
        ));
    }
    Ok(())
}

pub fn validate_renew_fraction(renew_fraction: f64) -> Result<()> {
    if !(renew_fraction > 0.0 && renew_fraction < 1.0) {
        return Err(Error::invalid_argument(
            "renew_fraction must be in (0, 1)",
        ));
    }
    Ok(())
}

/// A successful `Acquire`: the row state at the moment the hold changed
/// hands. `epoch` proves this acquisition is the current one (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredLease {
    pub epoch: i64,
    pub expires_at_utc: DateTime<Utc>,
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
