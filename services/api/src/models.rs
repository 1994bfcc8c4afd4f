//! API and Database Models
//!
//! Core data structures used for database mapping with `sqlx` and for
//! the OpenAPI documentation generated with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[sqlx(type_name = "call_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ongoing,
    Completed,
    Failed,
}

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[sqlx(type_name = "call_channel", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CallChannel {
    Web,
    Phone,
}

#[derive(sqlx::Type, Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq)]
#[sqlx(type_name = "turn_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnRole::User => write!(f, "user"),
            TurnRole::Agent => write!(f, "agent"),
        }
    }
}

/// One persisted call. Created when a call starts, finalized exactly
/// once when it ends.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct CallRecord {
    /// The conversation id; generated fresh at every call start.
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    #[schema(value_type = String, format = Uuid)]
    pub workspace_id: Uuid,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub contact_id: Option<Uuid>,
    #[schema(value_type = String, example = "web")]
    pub channel: CallChannel,
    #[schema(value_type = String, example = "ongoing")]
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: Option<i32>,
    pub summary: Option<String>,
    pub intent: Option<String>,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

/// One persisted conversation turn, written only at turn boundaries or
/// at call end, never per-delta.
#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct TurnRecord {
    pub id: i64,
    #[schema(value_type = String, format = Uuid)]
    pub call_id: Uuid,
    #[schema(value_type = String, example = "user")]
    pub role: TurnRole,
    pub text: String,
    pub tool_name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub tool_args: Option<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub tool_result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A call together with its transcript, as served by the REST API.
#[derive(Serialize, ToSchema, Debug)]
pub struct CallWithTurns {
    #[serde(flatten)]
    pub call: CallRecord,
    pub turns: Vec<TurnRecord>,
}

/// A currently connected session, from the in-memory registry.
#[derive(Serialize, ToSchema, Debug, Clone)]
pub struct ActiveSession {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(value_type = String, format = Uuid)]
    pub workspace_id: Uuid,
    #[schema(value_type = String, example = "web")]
    pub channel: CallChannel,
    #[schema(value_type = Option<String>, format = Uuid)]
    pub conversation_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status_serialization() {
        assert_eq!(serde_json::to_string(&CallStatus::Ongoing).unwrap(), "\"ongoing\"");
        assert_eq!(serde_json::to_string(&CallStatus::Completed).unwrap(), "\"completed\"");
        assert_eq!(serde_json::to_string(&CallStatus::Failed).unwrap(), "\"failed\"");

        let status: CallStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(status, CallStatus::Completed);
    }

    #[test]
    fn test_call_channel_serialization() {
        assert_eq!(serde_json::to_string(&CallChannel::Web).unwrap(), "\"web\"");
        assert_eq!(serde_json::to_string(&CallChannel::Phone).unwrap(), "\"phone\"");
    }

    #[test]
    fn test_turn_role_display() {
        assert_eq!(format!("{}", TurnRole::User), "user");
        assert_eq!(format!("{}", TurnRole::Agent), "agent");
    }

    #[test]
    fn test_invalid_enum_deserialization() {
        let result: Result<CallStatus, _> = serde_json::from_str("\"paused\"");
        assert!(result.is_err());
        let result: Result<TurnRole, _> = serde_json::from_str("\"system\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_call_record_round_trip() {
        let call = CallRecord {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            contact_id: None,
            channel: CallChannel::Phone,
            status: CallStatus::Ongoing,
            started_at: Utc::now(),
            ended_at: None,
            duration_sec: None,
            summary: None,
            intent: None,
            metadata: serde_json::json!({"stream_sid": "MZ123"}),
        };

        let json = serde_json::to_string(&call).unwrap();
        let back: CallRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, call.id);
        assert_eq!(back.channel, CallChannel::Phone);
        assert_eq!(back.metadata["stream_sid"], "MZ123");
    }
}
