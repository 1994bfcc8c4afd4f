//! Provider-side session logic: the Gemini Live protocol client and
//! the per-call conversation session that drives it.

pub mod conversation;
pub mod gemini;

pub use conversation::{ConversationSession, SessionError};

/// The internal event vocabulary consumed by the browser session
/// manager and the telephony bridge. A tagged union rather than named
/// listeners, so handling is exhaustiveness-checked.
#[derive(Debug)]
pub enum ProviderEvent {
    /// The live connection is open (handshake may still be pending).
    Open,
    /// The provider acknowledged the session setup.
    SetupComplete,
    /// Incremental caller transcript.
    SttDelta(String),
    /// Incremental agent transcript.
    AgentDelta(String),
    /// Synthesized agent audio, base64 PCM16 at `sample_rate`.
    TtsAudio {
        pcm16_base64: String,
        sample_rate: u32,
    },
    /// The agent finished a turn. Carries the utterances finalized at
    /// this boundary, already trimmed; `None` when a side said nothing.
    AgentComplete {
        user_text: Option<String>,
        agent_text: Option<String>,
    },
    /// The model requested a tool invocation.
    ToolCall(voicebridge_core::tools::ToolInvocation),
    /// The provider reported an error; the call may continue.
    Error(String),
    /// The live connection closed.
    Closed,
}
