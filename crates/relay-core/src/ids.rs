//! Opaque identifier newtypes (C1).
//!
//! Each identifier wraps a 128-bit random value and is not interchangeable
//! with any other identifier type, even though most of them share the same
//! underlying representation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_identifier!(OwnerToken);
uuid_identifier!(OutboxMessageIdentifier);
uuid_identifier!(OutboxWorkItemIdentifier);
uuid_identifier!(JoinIdentifier);
uuid_identifier!(InstanceIdentifier);
uuid_identifier!(DatabaseIdentifier);

/// Source-provided business identifier for an inbound message.
///
/// Unlike the other identifiers this is caller-supplied, not generated, so it
/// is validated on construction rather than assumed well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct InboxMessageIdentifier(pub String);

/// Maximum byte length for an inbox message identifier (§3).
pub const MAX_INBOX_MESSAGE_ID_BYTES: usize = 128;

impl InboxMessageIdentifier {
    pub fn new(value: impl Into<String>) -> crate::Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(crate::Error::InvalidArgument {
                message: "inbox message id must not be empty".into(),
            });
        }
        if value.len() > MAX_INBOX_MESSAGE_ID_BYTES {
            return Err(crate::Error::InvalidArgument {
                message: format!(
                    "inbox message id exceeds {MAX_INBOX_MESSAGE_ID_BYTES} bytes"
                ),
            });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InboxMessageIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_token_round_trips_through_uuid() {
        let token = OwnerToken::new();
        let uuid: Uuid = token.into();
        assert_eq!(OwnerToken::from(uuid), token);
    }

    #[test]
    fn inbox_message_identifier_rejects_empty_and_oversized() {
        assert!(InboxMessageIdentifier::new("").is_err());
        let too_long = "x".repeat(MAX_INBOX_MESSAGE_ID_BYTES + 1);
        assert!(InboxMessageIdentifier::new(too_long).is_err());
        assert!(InboxMessageIdentifier::new("order-123").is_ok());
    }
}
