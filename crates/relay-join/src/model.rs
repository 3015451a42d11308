use chrono::{DateTime, Utc};
use relay_core::JoinIdentifier;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum JoinStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl sqlx::Type<sqlx::Postgres> for JoinStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Decode<'_, sqlx::Postgres> for JoinStatus {
    fn decode(
        value: sqlx::postgres::PgValueRef<'_>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        JoinStatus::try_from(raw).map_err(|e| e.into())
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for JoinStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> sqlx::encode::IsNull {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&(*self as i16), buf)
    }
}

impl TryFrom<i16> for JoinStatus {
    type Error = relay_core::Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(JoinStatus::Pending),
            1 => Ok(JoinStatus::Completed),
            2 => Ok(JoinStatus::Failed),
            other => Err(relay_core::Error::invalid_argument(format!(
                "unknown join status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum MemberStatus {
    Pending = 0,
    Completed = 1,
    Failed = 2,
}

impl TryFrom<i16> for MemberStatus {
    type Error = relay_core::Error;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MemberStatus::Pending),
            1 => Ok(MemberStatus::Completed),
            2 => Ok(MemberStatus::Failed),
            other => Err(relay_core::Error::invalid_argument(format!(
                "unknown join member status {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Join {
    pub join_id: JoinIdentifier,
    pub tenant_id: i64,
    pub expected_steps: i32,
    pub completed_steps: i32,
    pub failed_steps: i32,
    pub status: JoinStatus,
    pub metadata: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub last_updated_utc: DateTime<Utc>,
}

impl Join {
    /// `CompletedSteps + FailedSteps ≥ ExpectedSteps` (§4.7, §8 property 6).
    pub fn is_ready(&self) -> bool {
        self.completed_steps + self.failed_steps >= self.expected_steps
    }
}
