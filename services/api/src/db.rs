//! Data Access Layer
//!
//! All PostgreSQL access for the service goes through this module. It
//! uses `sqlx` with runtime-checked queries and connection pooling.
//! Persistence is a collaborator of the call engine: the sessions only
//! require create-on-start and update-on-end semantics for calls, and
//! append semantics for turns.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;
use voicebridge_core::settings::AgentSettings;

use crate::models::{CallChannel, CallRecord, CallStatus, TurnRecord, TurnRole};

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Loads the agent settings for a workspace. Returns `None` when
    /// the workspace does not exist; a workspace with empty settings
    /// yields the defaults.
    pub async fn get_workspace_settings(
        &self,
        workspace_id: Uuid,
    ) -> Result<Option<AgentSettings>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT settings FROM workspaces WHERE id = $1")
                .bind(workspace_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((settings,)) => Ok(Some(serde_json::from_value(settings)?)),
            None => Ok(None),
        }
    }

    /// Looks up a contact by caller number after digits-only
    /// normalization.
    pub async fn find_contact_by_phone(
        &self,
        workspace_id: Uuid,
        phone: &str,
    ) -> Result<Option<Uuid>> {
        let normalized = normalize_phone(phone);
        if normalized.is_empty() {
            return Ok(None);
        }
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM contacts WHERE workspace_id = $1 AND phone_normalized = $2",
        )
        .bind(workspace_id)
        .bind(normalized)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    /// Creates the call record at call start, status `ongoing`.
    pub async fn create_call(
        &self,
        conversation_id: Uuid,
        workspace_id: Uuid,
        contact_id: Option<Uuid>,
        channel: CallChannel,
        metadata: serde_json::Value,
    ) -> Result<CallRecord> {
        let call = sqlx::query_as::<_, CallRecord>(
            r#"
            INSERT INTO calls (id, workspace_id, contact_id, channel, status, metadata)
            VALUES ($1, $2, $3, $4, 'ongoing', $5)
            RETURNING id, workspace_id, contact_id, channel, status,
                      started_at, ended_at, duration_sec, summary, intent, metadata
            "#,
        )
        .bind(conversation_id)
        .bind(workspace_id)
        .bind(contact_id)
        .bind(channel)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(call)
    }

    /// Finalizes a call exactly once. The `status = 'ongoing'` guard
    /// makes concurrent finalize attempts a no-op after the first.
    ///
    /// Returns `true` when this invocation performed the update.
    pub async fn finalize_call(
        &self,
        conversation_id: Uuid,
        status: CallStatus,
        summary: &str,
        intent: &str,
        duration_sec: i32,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET status = $2, summary = $3, intent = $4,
                duration_sec = $5, ended_at = $6
            WHERE id = $1 AND status = 'ongoing'
            "#,
        )
        .bind(conversation_id)
        .bind(status)
        .bind(summary)
        .bind(intent)
        .bind(duration_sec)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Appends a turn to a call's transcript.
    pub async fn add_turn(
        &self,
        call_id: Uuid,
        role: TurnRole,
        text: &str,
        tool_name: Option<&str>,
        tool_args: Option<&serde_json::Value>,
        tool_result: Option<&serde_json::Value>,
    ) -> Result<TurnRecord> {
        let turn = sqlx::query_as::<_, TurnRecord>(
            r#"
            INSERT INTO turns (call_id, role, text, tool_name, tool_args, tool_result)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, call_id, role, text, tool_name, tool_args, tool_result, created_at
            "#,
        )
        .bind(call_id)
        .bind(role)
        .bind(text)
        .bind(tool_name)
        .bind(tool_args)
        .bind(tool_result)
        .fetch_one(&self.pool)
        .await?;
        Ok(turn)
    }

    /// Lists calls for a workspace, most recent first.
    pub async fn list_calls(&self, workspace_id: Uuid) -> Result<Vec<CallRecord>> {
        let calls = sqlx::query_as::<_, CallRecord>(
            r#"
            SELECT id, workspace_id, contact_id, channel, status,
                   started_at, ended_at, duration_sec, summary, intent, metadata
            FROM calls
            WHERE workspace_id = $1
            ORDER BY started_at DESC
            "#,
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(calls)
    }

    /// Retrieves a single call by its conversation id.
    pub async fn get_call(&self, call_id: Uuid) -> Result<Option<CallRecord>> {
        let call = sqlx::query_as::<_, CallRecord>(
            r#"
            SELECT id, workspace_id, contact_id, channel, status,
                   started_at, ended_at, duration_sec, summary, intent, metadata
            FROM calls
            WHERE id = $1
            "#,
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(call)
    }

    /// Retrieves the full transcript of a call, ordered chronologically.
    pub async fn get_call_turns(&self, call_id: Uuid) -> Result<Vec<TurnRecord>> {
        let turns = sqlx::query_as::<_, TurnRecord>(
            r#"
            SELECT id, call_id, role, text, tool_name, tool_args, tool_result, created_at
            FROM turns
            WHERE call_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(turns)
    }
}

/// Strips everything but digits from a caller number so lookups match
/// regardless of carrier formatting.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+1 (555) 010-2345"), "15550102345");
        assert_eq!(normalize_phone("555.010.2345"), "5550102345");
        assert_eq!(normalize_phone("anonymous"), "");
        assert_eq!(normalize_phone(""), "");
    }
}
