use relay_core::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum OutboxStatus {
    Ready = 0,
    InProgress = 1,
    Done = 2,
    Failed = 3,
}

impl TryFrom<i16> for OutboxStatus {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(OutboxStatus::Ready),
            1 => Ok(OutboxStatus::InProgress),
            2 => Ok(OutboxStatus::Done),
            3 => Ok(OutboxStatus::Failed),
            other => Err(Error::invalid_argument(format!(
                "unknown outbox status {other}"
            ))),
        }
    }
}
