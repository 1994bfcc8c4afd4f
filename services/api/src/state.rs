//! Shared Application State
//!
//! The `AppState` struct holds all shared, clonable resources: the
//! database pool wrapper, the loaded configuration, the tool executor,
//! and the registry of live websocket sessions.

use crate::config::Config;
use crate::models::{ActiveSession, CallChannel};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;
use voicebridge_core::tools::ToolExecutor;

/// The shared application state, created once at startup and passed to
/// all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    pub config: Arc<Config>,
    pub tool_executor: Arc<dyn ToolExecutor>,
    /// Registry of live sessions, keyed by session id. Sessions never
    /// share mutable state with each other; this map only exists for
    /// connect/disconnect bookkeeping and the read-only REST view.
    pub sessions: Arc<DashMap<Uuid, ActiveSession>>,
}

impl AppState {
    /// Records a newly accepted websocket connection.
    pub fn register_session(&self, workspace_id: Uuid, channel: CallChannel) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.insert(
            session_id,
            ActiveSession {
                session_id,
                workspace_id,
                channel,
                conversation_id: None,
                connected_at: Utc::now(),
            },
        );
        session_id
    }

    /// Updates the conversation id shown for a session (set at
    /// call start, cleared at call stop).
    pub fn set_session_conversation(&self, session_id: Uuid, conversation_id: Option<Uuid>) {
        if let Some(mut entry) = self.sessions.get_mut(&session_id) {
            entry.conversation_id = conversation_id;
        }
    }

    /// Drops a session from the registry on disconnect.
    pub fn unregister_session(&self, session_id: Uuid) {
        self.sessions.remove(&session_id);
    }
}
