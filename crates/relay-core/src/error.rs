//! Error taxonomy (§7).
//!
//! `NotFound`/`Lost`/`Released`/`OwnerMismatch` are deliberately *not* part of
//! this enum: §7 specifies they are result variants or silent no-ops, never
//! exceptions, so each operation returns its own small outcome enum instead
//! of routing those cases through `Error`.

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name/TTL/limit/owner outside the allowed domain, or a missing required id.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database connectivity, timeout, deadlock, or any other I/O failure.
    /// Operations are idempotent by ownership, so callers may retry at will.
    #[error("transient I/O error: {0}")]
    TransientIO(#[from] sqlx::Error),

    /// A handler threw a recoverable error; the dispatcher abandons (retries) the item.
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// A handler threw repeatedly, or no handler is registered for the topic (inbox only);
    /// the dispatcher dead-letters the item.
    #[error("poison message: {0}")]
    Poison(String),

    /// `join.wait` observed a join whose counters have not yet reached `ExpectedSteps`.
    #[error("join {join_id} is not ready")]
    JoinNotReady { join_id: crate::JoinIdentifier },

    /// `serde_json` (de)serialization of a payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `Runner::throw_if_lost` once the runner has observed its lease lost
    /// to another acquirer (§4.6: "`ThrowIfLost()` must throw once `IsLost`
    /// is true" — unlike `Renew`'s `Lost` outcome, this one check is
    /// explicitly specified as an exception, not a result variant).
    #[error("lease {name} was lost")]
    LeaseLost { name: String },
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}
