//! Defines the WebSocket message protocol between the browser client
//! and the API server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Application-level error codes carried in `error` replies.
pub mod codes {
    pub const NO_ACTIVE_CALL: &str = "NO_ACTIVE_CALL";
    pub const CALL_ALREADY_ACTIVE: &str = "CALL_ALREADY_ACTIVE";
    pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
    pub const START_FAILED: &str = "START_FAILED";
    pub const UNKNOWN_WORKSPACE: &str = "UNKNOWN_WORKSPACE";
}

/// Application close codes used when refusing a connection outright.
pub mod close_codes {
    /// No identity (token or workspace) on the browser socket.
    pub const UNAUTHENTICATED: u16 = 4401;
    /// No resolvable workspace on the telephony socket.
    pub const NO_WORKSPACE: u16 = 4403;
}

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Starts a new call on this connection.
    #[serde(rename = "call.start")]
    CallStart,
    /// A chunk of microphone audio, base64 PCM16 at `sample_rate`.
    #[serde(rename = "audio.chunk", rename_all = "camelCase")]
    AudioChunk {
        pcm16_chunk_base64: String,
        sample_rate: u32,
        /// Client-side sequence number, for diagnostics only.
        #[serde(default)]
        seq: Option<u64>,
    },
    /// Ends the active call.
    #[serde(rename = "call.stop")]
    CallStop,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once immediately after the socket is accepted.
    #[serde(rename = "connected")]
    Connected,
    /// Confirms a call has started and carries its conversation id.
    #[serde(rename = "call.started", rename_all = "camelCase")]
    CallStarted { conversation_id: Uuid },
    /// An incremental caller (speech-to-text) transcript delta.
    #[serde(rename = "stt.delta", rename_all = "camelCase")]
    SttDelta { text_delta: String },
    /// An incremental agent transcript delta.
    #[serde(rename = "agent.delta", rename_all = "camelCase")]
    AgentDelta { text_delta: String },
    /// A chunk of synthesized agent audio, base64 PCM16.
    #[serde(rename = "tts.audio", rename_all = "camelCase")]
    TtsAudio { pcm16_chunk_base64: String },
    /// The call has ended; carries the synthesized wrap-up.
    #[serde(rename = "call.ended", rename_all = "camelCase")]
    CallEnded {
        conversation_id: Uuid,
        summary: String,
        intent: String,
        duration_sec: i64,
    },
    /// A tool invocation requested by the agent, forwarded for
    /// visibility while the server executes it.
    #[serde(rename = "tool.call", rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// An application error; the connection stays open.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}
