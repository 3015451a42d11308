use relay_core::{Error, InboxMessageIdentifier};
use serde::{Deserialize, Serialize};

/// The inbox work-item key: a composite `(MessageId, Source)` pair (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InboxKey {
    pub message_id: InboxMessageIdentifier,
    pub source: String,
}

impl InboxKey {
    pub fn new(message_id: InboxMessageIdentifier, source: impl Into<String>) -> Self {
        Self {
            message_id,
            source: source.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboxStatus {
    Seen,
    Processing,
    Done,
    Dead,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Seen => "Seen",
            InboxStatus::Processing => "Processing",
            InboxStatus::Done => "Done",
            InboxStatus::Dead => "Dead",
        }
    }
}

impl std::str::FromStr for InboxStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Seen" => Ok(InboxStatus::Seen),
            "Processing" => Ok(InboxStatus::Processing),
            "Done" => Ok(InboxStatus::Done),
            "Dead" => Ok(InboxStatus::Dead),
            other => Err(Error::invalid_argument(format!(
                "unknown inbox status {other:?}"
            ))),
        }
    }
}
