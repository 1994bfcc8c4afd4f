//! The per-call conversation session.
//!
//! A `ConversationSession` binds one workspace's agent settings to one
//! live provider connection. The live client is discarded and rebuilt
//! on every `start_conversation`, which is the only point where edited
//! settings (tone, rules, voice) take effect.

use super::ProviderEvent;
use super::gemini::{EndSensitivity, GeminiLiveClient, LiveEvent, LiveOptions, StartSensitivity};
use crate::config::Config;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use voicebridge_core::prompt::{build_system_prompt, voice_for_gender};
use voicebridge_core::settings::AgentSettings;
use voicebridge_core::transcript::{
    CallOutcome, INTENT_PLACEHOLDER, SpeakerRole, TranscriptAccumulator, Turn, summarize_turns,
};

const DEFAULT_SILENCE_DURATION_MS: u32 = 800;
const DEFAULT_PREFIX_PADDING_MS: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no provider API credential is configured")]
    MissingCredential,
    #[error("failed to connect to the provider: {0}")]
    Connection(String),
}

/// Transcript state shared with the event pump task.
#[derive(Default)]
struct TranscriptState {
    stt: TranscriptAccumulator,
    agent: TranscriptAccumulator,
    turns: Vec<Turn>,
}

impl TranscriptState {
    /// Finalizes the current turn: non-empty accumulated texts become
    /// turns, both accumulators reset.
    fn finalize_turn(&mut self) -> (Option<String>, Option<String>) {
        let user = non_empty(self.stt.take());
        let agent = non_empty(self.agent.take());
        if let Some(text) = &user {
            self.turns.push(Turn { role: SpeakerRole::User, text: text.clone() });
        }
        if let Some(text) = &agent {
            self.turns.push(Turn { role: SpeakerRole::Agent, text: text.clone() });
        }
        (user, agent)
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

pub struct ConversationSession {
    settings: AgentSettings,
    api_key: String,
    model: String,
    connect_timeout: Duration,
    conversation_id: Option<Uuid>,
    client: Option<GeminiLiveClient>,
    pump: Option<JoinHandle<()>>,
    transcripts: Arc<Mutex<TranscriptState>>,
}

impl ConversationSession {
    /// Stores the settings snapshot and validates that a credential is
    /// available. Does not connect.
    pub fn new(settings: AgentSettings, config: &Config) -> Result<Self, SessionError> {
        let api_key = config
            .gemini_api_key
            .clone()
            .ok_or(SessionError::MissingCredential)?;
        Ok(Self {
            settings,
            api_key,
            model: config.live_model.clone(),
            connect_timeout: config.live_connect_timeout,
            conversation_id: None,
            client: None,
            pump: None,
            transcripts: Arc::new(Mutex::new(TranscriptState::default())),
        })
    }

    pub fn conversation_id(&self) -> Option<Uuid> {
        self.conversation_id
    }

    /// Starts a call: resets transcript state, tears down any previous
    /// live client (awaited, so two sockets never coexist), connects a
    /// fresh one built from the current settings, and returns the
    /// event stream for this call.
    pub async fn start_conversation(
        &mut self,
        conversation_id: Uuid,
    ) -> Result<mpsc::Receiver<ProviderEvent>, SessionError> {
        self.teardown_client().await;
        self.conversation_id = Some(conversation_id);
        *self.transcripts.lock().await = TranscriptState::default();

        let options = LiveOptions {
            model: self.model.clone(),
            voice_name: voice_for_gender(self.settings.agent_gender.as_deref()).to_string(),
            system_instruction: build_system_prompt(&self.settings),
            response_modality: "AUDIO".to_string(),
            vad_start_sensitivity: StartSensitivity::High,
            vad_end_sensitivity: EndSensitivity::High,
            silence_duration_ms: DEFAULT_SILENCE_DURATION_MS,
            prefix_padding_ms: DEFAULT_PREFIX_PADDING_MS,
        };

        let (client, live_rx) =
            GeminiLiveClient::connect(&self.api_key, &options, self.connect_timeout)
                .await
                .map_err(|e| SessionError::Connection(e.to_string()))?;
        self.client = Some(client);

        let (event_tx, event_rx) = mpsc::channel(128);
        let transcripts = self.transcripts.clone();
        self.pump = Some(tokio::spawn(async move {
            pump_events(live_rx, event_tx, transcripts).await;
        }));

        Ok(event_rx)
    }

    /// Forwards one caller audio chunk to the live connection.
    pub async fn send_audio(&self, base64_pcm: &str, sample_rate: u32) -> Result<()> {
        self.client
            .as_ref()
            .context("no live connection")?
            .send_audio_chunk(base64_pcm, sample_rate)
            .await
    }

    /// Sends a text turn on the non-audio input path.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.client
            .as_ref()
            .context("no live connection")?
            .send_text_turn(text)
            .await
    }

    /// Feeds a tool result back into the live conversation.
    pub async fn send_tool_result(
        &self,
        id: &str,
        name: &str,
        result: serde_json::Value,
    ) -> Result<()> {
        self.client
            .as_ref()
            .context("no live connection")?
            .send_tool_result(id, name, result)
            .await
    }

    /// Wraps up the call: flushes any unfinalized utterances into the
    /// turn list and synthesizes the summary and intent label.
    ///
    /// Returns the outcome together with the turns that were still
    /// unflushed at this point, so callers can persist them. Does not
    /// persist anything itself.
    pub async fn end_conversation(&mut self) -> (CallOutcome, Vec<Turn>) {
        let mut state = self.transcripts.lock().await;
        let before = state.turns.len();
        state.finalize_turn();
        let unflushed = state.turns[before..].to_vec();
        let outcome = CallOutcome {
            summary: summarize_turns(&state.turns),
            intent: INTENT_PLACEHOLDER.to_string(),
        };
        (outcome, unflushed)
    }

    /// Tears down the live client and clears transcript state. Safe to
    /// call any number of times.
    pub async fn disconnect(&mut self) {
        self.teardown_client().await;
        self.conversation_id = None;
        *self.transcripts.lock().await = TranscriptState::default();
    }

    async fn teardown_client(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut client) = self.client.take() {
            client.disconnect().await;
        }
    }
}

/// Translates raw live events into the provider event vocabulary,
/// diffing cumulative transcripts into deltas and finalizing turns.
async fn pump_events(
    mut live_rx: mpsc::Receiver<LiveEvent>,
    event_tx: mpsc::Sender<ProviderEvent>,
    transcripts: Arc<Mutex<TranscriptState>>,
) {
    if event_tx.send(ProviderEvent::Open).await.is_err() {
        return;
    }

    while let Some(event) = live_rx.recv().await {
        let translated = match event {
            LiveEvent::SetupComplete => Some(ProviderEvent::SetupComplete),
            LiveEvent::InputTranscript(snapshot) => {
                let mut state = transcripts.lock().await;
                state.stt.push_snapshot(&snapshot).map(ProviderEvent::SttDelta)
            }
            LiveEvent::OutputTranscript(snapshot) => {
                let mut state = transcripts.lock().await;
                state.agent.push_snapshot(&snapshot).map(ProviderEvent::AgentDelta)
            }
            LiveEvent::Audio { data, sample_rate } => Some(ProviderEvent::TtsAudio {
                pcm16_base64: data,
                sample_rate,
            }),
            LiveEvent::TurnComplete => {
                let mut state = transcripts.lock().await;
                let (user_text, agent_text) = state.finalize_turn();
                Some(ProviderEvent::AgentComplete { user_text, agent_text })
            }
            LiveEvent::ToolCall { id, name, args } => {
                Some(ProviderEvent::ToolCall(voicebridge_core::tools::ToolInvocation {
                    id,
                    name,
                    args,
                }))
            }
            LiveEvent::GoAway => {
                warn!("Live API announced an imminent disconnect");
                None
            }
            LiveEvent::Error(message) => {
                warn!(%message, "Live API error event");
                Some(ProviderEvent::Error(message))
            }
            LiveEvent::Closed => {
                debug!("Live connection closed; ending event pump");
                let _ = event_tx.send(ProviderEvent::Closed).await;
                return;
            }
        };

        if let Some(event) = translated
            && event_tx.send(event).await.is_err()
        {
            return;
        }
    }
    let _ = event_tx.send(ProviderEvent::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::net::SocketAddr;
    use tracing::Level;

    fn test_config(api_key: Option<&str>) -> Config {
        Config {
            bind_address: "127.0.0.1:3000".parse::<SocketAddr>().unwrap(),
            database_url: "postgresql://test@localhost/test".to_string(),
            gemini_api_key: api_key.map(|k| k.to_string()),
            live_model: "models/gemini-2.0-flash-exp".to_string(),
            live_connect_timeout: Duration::from_secs(5),
            log_level: Level::INFO,
        }
    }

    #[test]
    fn test_new_requires_credential() {
        let err = ConversationSession::new(AgentSettings::default(), &test_config(None))
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::MissingCredential));

        assert!(ConversationSession::new(AgentSettings::default(), &test_config(Some("key")))
            .is_ok());
    }

    #[tokio::test]
    async fn test_end_conversation_without_turns() {
        let mut session =
            ConversationSession::new(AgentSettings::default(), &test_config(Some("key"))).unwrap();
        let (outcome, unflushed) = session.end_conversation().await;
        assert_eq!(outcome.summary, "");
        assert_eq!(outcome.intent, INTENT_PLACEHOLDER);
        assert!(unflushed.is_empty());
    }

    #[tokio::test]
    async fn test_end_conversation_flushes_partial_utterances() {
        let session =
            ConversationSession::new(AgentSettings::default(), &test_config(Some("key"))).unwrap();
        {
            let mut state = session.transcripts.lock().await;
            state.stt.push_snapshot("I would like to book");
            state.agent.push_snapshot("Of course, when");
        }
        let mut session = session;
        let (outcome, unflushed) = session.end_conversation().await;
        assert_eq!(unflushed.len(), 2);
        assert_eq!(unflushed[0].role, SpeakerRole::User);
        assert_eq!(unflushed[0].text, "I would like to book");
        assert!(outcome.summary.contains("user: I would like to book"));
        assert!(outcome.summary.contains("agent: Of course, when"));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mut session =
            ConversationSession::new(AgentSettings::default(), &test_config(Some("key"))).unwrap();
        session.disconnect().await;
        session.disconnect().await;
        assert!(session.conversation_id().is_none());
    }

    #[tokio::test]
    async fn test_pump_diffs_snapshots_and_finalizes_turns() {
        let (live_tx, live_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let transcripts = Arc::new(Mutex::new(TranscriptState::default()));
        let pump = tokio::spawn(pump_events(live_rx, event_tx, transcripts.clone()));

        live_tx.send(LiveEvent::SetupComplete).await.unwrap();
        live_tx
            .send(LiveEvent::InputTranscript("hello".to_string()))
            .await
            .unwrap();
        live_tx
            .send(LiveEvent::InputTranscript("hello world".to_string()))
            .await
            .unwrap();
        // A duplicate snapshot must not produce a delta.
        live_tx
            .send(LiveEvent::InputTranscript("hello world".to_string()))
            .await
            .unwrap();
        live_tx
            .send(LiveEvent::OutputTranscript("hi!".to_string()))
            .await
            .unwrap();
        live_tx.send(LiveEvent::TurnComplete).await.unwrap();
        live_tx.send(LiveEvent::Closed).await.unwrap();

        assert!(matches!(event_rx.recv().await, Some(ProviderEvent::Open)));
        assert!(matches!(event_rx.recv().await, Some(ProviderEvent::SetupComplete)));
        match event_rx.recv().await {
            Some(ProviderEvent::SttDelta(d)) => assert_eq!(d, "hello"),
            other => panic!("unexpected: {other:?}"),
        }
        match event_rx.recv().await {
            Some(ProviderEvent::SttDelta(d)) => assert_eq!(d, "world"),
            other => panic!("unexpected: {other:?}"),
        }
        match event_rx.recv().await {
            Some(ProviderEvent::AgentDelta(d)) => assert_eq!(d, "hi!"),
            other => panic!("unexpected: {other:?}"),
        }
        match event_rx.recv().await {
            Some(ProviderEvent::AgentComplete { user_text, agent_text }) => {
                assert_eq!(user_text.as_deref(), Some("hello world"));
                assert_eq!(agent_text.as_deref(), Some("hi!"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(event_rx.recv().await, Some(ProviderEvent::Closed)));

        let state = transcripts.lock().await;
        assert_eq!(state.turns.len(), 2);
        assert_eq!(state.turns[0].text, "hello world");
        assert_eq!(state.turns[1].text, "hi!");
        drop(state);
        pump.await.unwrap();
    }

    #[tokio::test]
    async fn test_pump_forwards_audio_and_tool_calls() {
        let (live_tx, live_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(16);
        let transcripts = Arc::new(Mutex::new(TranscriptState::default()));
        tokio::spawn(pump_events(live_rx, event_tx, transcripts));

        live_tx
            .send(LiveEvent::Audio { data: "AAAA".to_string(), sample_rate: 24000 })
            .await
            .unwrap();
        live_tx
            .send(LiveEvent::ToolCall {
                id: "t1".to_string(),
                name: "check_availability".to_string(),
                args: serde_json::json!({"date": "2026-09-01"}),
            })
            .await
            .unwrap();
        drop(live_tx);

        assert!(matches!(event_rx.recv().await, Some(ProviderEvent::Open)));
        match event_rx.recv().await {
            Some(ProviderEvent::TtsAudio { pcm16_base64, sample_rate }) => {
                assert_eq!(pcm16_base64, "AAAA");
                assert_eq!(sample_rate, 24000);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match event_rx.recv().await {
            Some(ProviderEvent::ToolCall(inv)) => {
                assert_eq!(inv.name, "check_availability");
                assert_eq!(inv.id, "t1");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(event_rx.recv().await, Some(ProviderEvent::Closed)));
    }
}
