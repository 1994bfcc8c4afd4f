//! Realtime WebSocket client for the Gemini Live API
//! (`BidiGenerateContent`).
//!
//! One client instance maps to one live connection and is single-use:
//! sessions construct a fresh client for every call so configuration
//! edits take effect. Application messages sent before the server's
//! `setupComplete` acknowledgement are buffered and flushed in FIFO
//! order exactly once when the handshake completes.

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Setup options for one live connection. These are configuration,
/// assembled per call from the workspace settings.
#[derive(Debug, Clone)]
pub struct LiveOptions {
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    /// Modality the model responds with, normally `"AUDIO"`.
    pub response_modality: String,
    /// Voice-activity-detection tuning.
    pub vad_start_sensitivity: StartSensitivity,
    pub vad_end_sensitivity: EndSensitivity,
    pub silence_duration_ms: u32,
    pub prefix_padding_ms: u32,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub enum StartSensitivity {
    #[serde(rename = "START_SENSITIVITY_HIGH")]
    High,
    #[serde(rename = "START_SENSITIVITY_LOW")]
    Low,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub enum EndSensitivity {
    #[serde(rename = "END_SENSITIVITY_HIGH")]
    High,
    #[serde(rename = "END_SENSITIVITY_LOW")]
    Low,
}

/// The small closed set of events the rest of the system consumes.
#[derive(Debug)]
pub enum LiveEvent {
    /// The server acknowledged the setup message; buffered messages
    /// have been flushed and streaming may begin.
    SetupComplete,
    /// Cumulative caller transcript snapshot.
    InputTranscript(String),
    /// Cumulative agent transcript snapshot.
    OutputTranscript(String),
    /// Inline synthesized audio, base64 PCM16 at `sample_rate`.
    Audio { data: String, sample_rate: u32 },
    /// The model finished its turn.
    TurnComplete,
    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        args: serde_json::Value,
    },
    /// The server announced an imminent disconnect.
    GoAway,
    /// The endpoint reported an error payload; the transport is still
    /// open unless `Closed` follows.
    Error(String),
    /// The transport closed.
    Closed,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// State guarded by a single mutex so that pre-handshake buffering and
/// post-handshake sends keep strict FIFO ordering.
struct Shared {
    sink: Option<WsSink>,
    setup_complete: bool,
    pending: VecDeque<String>,
}

impl Shared {
    /// Decides what to do with an outbound payload: buffer it while
    /// the handshake is pending, send it otherwise.
    fn should_buffer(&self) -> bool {
        !self.setup_complete
    }

    /// Marks the handshake complete and drains the buffer for sending.
    /// Called exactly once, from the reader task.
    fn begin_flush(&mut self) -> Vec<String> {
        self.setup_complete = true;
        self.pending.drain(..).collect()
    }
}

pub struct GeminiLiveClient {
    shared: Arc<Mutex<Shared>>,
    reader: Option<JoinHandle<()>>,
}

impl GeminiLiveClient {
    /// Opens the connection, sends the setup message, and spawns the
    /// reader task. Resolves once the transport reports open; the
    /// `setupComplete` acknowledgement arrives later as a [`LiveEvent`].
    pub async fn connect(
        api_key: &str,
        options: &LiveOptions,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<LiveEvent>)> {
        let url = format!("{LIVE_ENDPOINT}?key={api_key}");

        let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .context("timed out connecting to the Live API")?
            .context("failed to connect to the Live API")?;
        info!("Connected to Gemini Live WebSocket");

        let (mut sink, mut stream) = ws_stream.split();

        let setup = wire::ClientFrame::Setup(wire::Setup::from_options(options));
        sink.send(WsMessage::Text(serde_json::to_string(&setup)?.into()))
            .await
            .context("failed to send setup message")?;

        let shared = Arc::new(Mutex::new(Shared {
            sink: Some(sink),
            setup_complete: false,
            pending: VecDeque::new(),
        }));

        let (event_tx, event_rx) = mpsc::channel(128);
        let reader_shared = shared.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        for event in decode_server_frame(&text) {
                            if matches!(event, LiveEvent::SetupComplete) {
                                flush_pending(&reader_shared).await;
                            }
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(WsMessage::Close(close_frame)) => {
                        info!(?close_frame, "Live API closed the connection");
                        let _ = event_tx.send(LiveEvent::Closed).await;
                        return;
                    }
                    Err(e) => {
                        let _ = event_tx.send(LiveEvent::Error(e.to_string())).await;
                        let _ = event_tx.send(LiveEvent::Closed).await;
                        return;
                    }
                    _ => {}
                }
            }
            let _ = event_tx.send(LiveEvent::Closed).await;
        });

        Ok((
            Self {
                shared,
                reader: Some(reader),
            },
            event_rx,
        ))
    }

    /// Streams one chunk of caller audio, tagged with its sample rate.
    pub async fn send_audio_chunk(&self, base64_pcm: &str, sample_rate: u32) -> Result<()> {
        let frame = wire::ClientFrame::RealtimeInput(wire::RealtimeInput {
            audio: wire::Blob {
                mime_type: format!("audio/pcm;rate={sample_rate}"),
                data: base64_pcm.to_string(),
            },
        });
        self.enqueue_or_send(serde_json::to_string(&frame)?).await
    }

    /// Sends a complete text turn on the non-audio input path.
    pub async fn send_text_turn(&self, text: &str) -> Result<()> {
        let frame = wire::ClientFrame::ClientContent(wire::ClientContent {
            turns: vec![wire::Content {
                role: "user".to_string(),
                parts: vec![wire::Part {
                    text: text.to_string(),
                }],
            }],
            turn_complete: true,
        });
        self.enqueue_or_send(serde_json::to_string(&frame)?).await
    }

    /// Feeds a tool result back into the conversation.
    pub async fn send_tool_result(
        &self,
        id: &str,
        name: &str,
        response: serde_json::Value,
    ) -> Result<()> {
        let frame = wire::ClientFrame::ToolResponse(wire::ToolResponse {
            function_responses: vec![wire::FunctionResponse {
                id: id.to_string(),
                name: name.to_string(),
                response,
            }],
        });
        self.enqueue_or_send(serde_json::to_string(&frame)?).await
    }

    async fn enqueue_or_send(&self, payload: String) -> Result<()> {
        let mut shared = self.shared.lock().await;
        // A missing sink means the client was disconnected; buffering
        // would swallow the message forever.
        if shared.sink.is_none() {
            bail!("live connection is closed");
        }
        if shared.should_buffer() {
            debug!("Buffering message until setup completes");
            shared.pending.push_back(payload);
            return Ok(());
        }
        match shared.sink.as_mut() {
            Some(sink) => {
                sink.send(WsMessage::Text(payload.into())).await?;
                Ok(())
            }
            None => bail!("live connection is closed"),
        }
    }

    /// Closes the transport and clears all state. Idempotent; the
    /// instance cannot be reused afterwards.
    pub async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        let mut shared = self.shared.lock().await;
        shared.pending.clear();
        shared.setup_complete = false;
        if let Some(mut sink) = shared.sink.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
        }
    }
}

/// Flushes buffered messages after `setupComplete`, in arrival order.
/// Holding the lock for the whole drain keeps later sends from
/// overtaking buffered ones.
async fn flush_pending(shared: &Arc<Mutex<Shared>>) {
    let mut shared = shared.lock().await;
    let queued = shared.begin_flush();
    if queued.is_empty() {
        return;
    }
    info!(count = queued.len(), "Setup complete; flushing buffered messages");
    if let Some(sink) = shared.sink.as_mut() {
        for payload in queued {
            if let Err(e) = sink.send(WsMessage::Text(payload.into())).await {
                warn!(error = %e, "Failed to flush buffered message");
                return;
            }
        }
    }
}

/// Decodes one inbound frame into zero or more events. Malformed
/// frames and unrecognized shapes are diagnostics, never errors: the
/// connection stays open.
fn decode_server_frame(text: &str) -> Vec<LiveEvent> {
    let frame: wire::ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable Live API frame");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(LiveEvent::SetupComplete);
    }

    if frame.go_away.is_some() {
        events.push(LiveEvent::GoAway);
    }

    if let Some(tool_call) = frame.tool_call {
        for call in tool_call.function_calls {
            events.push(LiveEvent::ToolCall {
                id: call.id.unwrap_or_default(),
                name: call.name,
                args: call.args.unwrap_or(serde_json::Value::Null),
            });
        }
    }

    if let Some(error) = frame.error {
        events.push(LiveEvent::Error(error.message.unwrap_or_else(|| {
            "the Live API reported an unspecified error".to_string()
        })));
    }

    if let Some(content) = frame.server_content {
        if let Some(transcription) = content.input_transcription
            && !transcription.text.is_empty()
        {
            events.push(LiveEvent::InputTranscript(transcription.text));
        }
        if let Some(transcription) = content.output_transcription
            && !transcription.text.is_empty()
        {
            events.push(LiveEvent::OutputTranscript(transcription.text));
        } else if let Some(model_turn) = &content.model_turn {
            // No explicit output transcript: fall back to non-thought
            // text parts of the model turn.
            let text: String = model_turn
                .parts
                .iter()
                .filter(|p| !p.thought.unwrap_or(false))
                .filter_map(|p| p.text.as_deref())
                .collect();
            if !text.is_empty() {
                events.push(LiveEvent::OutputTranscript(text));
            }
        }
        if let Some(model_turn) = content.model_turn {
            for part in model_turn.parts {
                if let Some(blob) = part.inline_data {
                    let sample_rate = parse_rate_from_mime(blob.mime_type.as_deref())
                        .unwrap_or(crate::audio::LIVE_API_OUTPUT_SAMPLE_RATE);
                    events.push(LiveEvent::Audio {
                        data: blob.data,
                        sample_rate,
                    });
                }
            }
        }
        if content.turn_complete == Some(true) {
            events.push(LiveEvent::TurnComplete);
        }
    }

    if events.is_empty() {
        debug!("Live API frame matched no known shape");
    }
    events
}

/// Extracts the sample rate from a mime type like `audio/pcm;rate=24000`.
fn parse_rate_from_mime(mime: Option<&str>) -> Option<u32> {
    mime?.split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.parse().ok())
}

/// Wire types for the Live API. Outbound frames serialize camelCase;
/// inbound frames are tolerated in both camelCase and snake_case by
/// normalizing at this decode boundary with serde aliases, so nothing
/// downstream ever sees the alternate casing.
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientFrame {
        Setup(Setup),
        RealtimeInput(RealtimeInput),
        ClientContent(ClientContent),
        ToolResponse(ToolResponse),
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Setup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub realtime_input_config: RealtimeInputConfig,
        pub system_instruction: SystemInstruction,
        pub input_audio_transcription: serde_json::Value,
        pub output_audio_transcription: serde_json::Value,
    }

    impl Setup {
        pub fn from_options(options: &super::LiveOptions) -> Self {
            Self {
                model: options.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec![options.response_modality.clone()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: options.voice_name.clone(),
                            },
                        },
                    },
                },
                realtime_input_config: RealtimeInputConfig {
                    automatic_activity_detection: AutomaticActivityDetection {
                        disabled: false,
                        start_of_speech_sensitivity: options.vad_start_sensitivity,
                        end_of_speech_sensitivity: options.vad_end_sensitivity,
                        silence_duration_ms: options.silence_duration_ms,
                        prefix_padding_ms: options.prefix_padding_ms,
                    },
                    turn_coverage: "TURN_INCLUDES_ONLY_ACTIVITY".to_string(),
                },
                system_instruction: SystemInstruction {
                    parts: vec![Part {
                        text: options.system_instruction.clone(),
                    }],
                },
                input_audio_transcription: serde_json::json!({}),
                output_audio_transcription: serde_json::json!({}),
            }
        }
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<String>,
        pub speech_config: SpeechConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInputConfig {
        pub automatic_activity_detection: AutomaticActivityDetection,
        pub turn_coverage: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct AutomaticActivityDetection {
        pub disabled: bool,
        pub start_of_speech_sensitivity: super::StartSensitivity,
        pub end_of_speech_sensitivity: super::EndSensitivity,
        pub silence_duration_ms: u32,
        pub prefix_padding_ms: u32,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct SystemInstruction {
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Part {
        pub text: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct RealtimeInput {
        pub audio: Blob,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct Content {
        pub role: String,
        pub parts: Vec<Part>,
    }

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolResponse {
        pub function_responses: Vec<FunctionResponse>,
    }

    #[derive(Serialize, Debug)]
    pub(super) struct FunctionResponse {
        pub id: String,
        pub name: String,
        pub response: serde_json::Value,
    }

    // --- Inbound frames ---

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerFrame {
        #[serde(alias = "setup_complete")]
        pub setup_complete: Option<serde_json::Value>,
        #[serde(alias = "server_content")]
        pub server_content: Option<ServerContent>,
        #[serde(alias = "tool_call")]
        pub tool_call: Option<ToolCall>,
        #[serde(alias = "go_away")]
        pub go_away: Option<serde_json::Value>,
        pub error: Option<ErrorPayload>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerContent {
        #[serde(alias = "model_turn")]
        pub model_turn: Option<ModelTurn>,
        #[serde(alias = "input_transcription")]
        pub input_transcription: Option<Transcription>,
        #[serde(alias = "output_transcription")]
        pub output_transcription: Option<Transcription>,
        #[serde(alias = "turn_complete")]
        pub turn_complete: Option<bool>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ModelTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub thought: Option<bool>,
        #[serde(alias = "inline_data")]
        pub inline_data: Option<ServerBlob>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerBlob {
        #[serde(alias = "mime_type")]
        pub mime_type: Option<String>,
        pub data: String,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct Transcription {
        #[serde(default)]
        pub text: String,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ToolCall {
        #[serde(alias = "function_calls", default)]
        pub function_calls: Vec<FunctionCall>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct FunctionCall {
        pub id: Option<String>,
        pub name: String,
        pub args: Option<serde_json::Value>,
    }

    #[derive(Deserialize, Debug)]
    pub(super) struct ErrorPayload {
        pub message: Option<String>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rate_from_mime() {
        assert_eq!(parse_rate_from_mime(Some("audio/pcm;rate=24000")), Some(24000));
        assert_eq!(parse_rate_from_mime(Some("audio/pcm; rate=16000")), Some(16000));
        assert_eq!(parse_rate_from_mime(Some("audio/pcm")), None);
        assert_eq!(parse_rate_from_mime(None), None);
    }

    #[test]
    fn test_setup_serialization_shape() {
        let options = LiveOptions {
            model: "models/gemini-2.0-flash-exp".to_string(),
            voice_name: "Kore".to_string(),
            system_instruction: "Be helpful.".to_string(),
            response_modality: "AUDIO".to_string(),
            vad_start_sensitivity: StartSensitivity::High,
            vad_end_sensitivity: EndSensitivity::High,
            silence_duration_ms: 800,
            prefix_padding_ms: 300,
        };
        let frame = wire::ClientFrame::Setup(wire::Setup::from_options(&options));
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();

        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/gemini-2.0-flash-exp");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        let vad = &setup["realtimeInputConfig"]["automaticActivityDetection"];
        assert_eq!(vad["disabled"], false);
        assert_eq!(vad["startOfSpeechSensitivity"], "START_SENSITIVITY_HIGH");
        assert_eq!(vad["silenceDurationMs"], 800);
        assert_eq!(vad["prefixPaddingMs"], 300);
        assert_eq!(setup["realtimeInputConfig"]["turnCoverage"], "TURN_INCLUDES_ONLY_ACTIVITY");
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Be helpful.");
        assert!(setup["inputAudioTranscription"].is_object());
        assert!(setup["outputAudioTranscription"].is_object());
    }

    #[test]
    fn test_decode_setup_complete_both_casings() {
        let events = decode_server_frame(r#"{"setupComplete": {}}"#);
        assert!(matches!(events.as_slice(), [LiveEvent::SetupComplete]));

        let events = decode_server_frame(r#"{"setup_complete": {}}"#);
        assert!(matches!(events.as_slice(), [LiveEvent::SetupComplete]));
    }

    #[test]
    fn test_decode_transcripts_both_casings() {
        let camel = r#"{"serverContent": {"inputTranscription": {"text": "hello"}}}"#;
        let snake = r#"{"server_content": {"input_transcription": {"text": "hello"}}}"#;
        for frame in [camel, snake] {
            let events = decode_server_frame(frame);
            match events.as_slice() {
                [LiveEvent::InputTranscript(text)] => assert_eq!(text, "hello"),
                other => panic!("unexpected events: {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_audio_with_rate() {
        let frame = r#"{"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}}
        ]}}}"#;
        let events = decode_server_frame(frame);
        match events.as_slice() {
            [LiveEvent::Audio { data, sample_rate }] => {
                assert_eq!(data, "AAAA");
                assert_eq!(*sample_rate, 24000);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_decode_audio_missing_rate_uses_output_default() {
        let frame = r#"{"server_content": {"model_turn": {"parts": [
            {"inline_data": {"data": "AAAA"}}
        ]}}}"#;
        let events = decode_server_frame(frame);
        match events.as_slice() {
            [LiveEvent::Audio { sample_rate, .. }] => {
                assert_eq!(*sample_rate, crate::audio::LIVE_API_OUTPUT_SAMPLE_RATE);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_model_text_is_transcript_fallback() {
        let frame = r#"{"serverContent": {"modelTurn": {"parts": [
            {"text": "internal reasoning", "thought": true},
            {"text": "Hello there!"}
        ]}}}"#;
        let events = decode_server_frame(frame);
        match events.as_slice() {
            [LiveEvent::OutputTranscript(text)] => assert_eq!(text, "Hello there!"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_output_transcript_wins_over_fallback() {
        let frame = r#"{"serverContent": {
            "outputTranscription": {"text": "spoken words"},
            "modelTurn": {"parts": [{"text": "other text"}]}
        }}"#;
        let events = decode_server_frame(frame);
        assert!(
            events
                .iter()
                .any(|e| matches!(e, LiveEvent::OutputTranscript(t) if t == "spoken words"))
        );
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, LiveEvent::OutputTranscript(t) if t == "other text"))
        );
    }

    #[test]
    fn test_decode_turn_complete() {
        let events = decode_server_frame(r#"{"serverContent": {"turnComplete": true}}"#);
        assert!(matches!(events.as_slice(), [LiveEvent::TurnComplete]));

        let events = decode_server_frame(r#"{"server_content": {"turn_complete": true}}"#);
        assert!(matches!(events.as_slice(), [LiveEvent::TurnComplete]));
    }

    #[test]
    fn test_decode_tool_call() {
        let frame = r#"{"toolCall": {"functionCalls": [
            {"id": "call-1", "name": "check_availability", "args": {"date": "2026-09-01"}}
        ]}}"#;
        let events = decode_server_frame(frame);
        match events.as_slice() {
            [LiveEvent::ToolCall { id, name, args }] => {
                assert_eq!(id, "call-1");
                assert_eq!(name, "check_availability");
                assert_eq!(args["date"], "2026-09-01");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_decode_go_away() {
        let events = decode_server_frame(r#"{"goAway": {"timeLeft": "2s"}}"#);
        assert!(matches!(events.as_slice(), [LiveEvent::GoAway]));
    }

    #[test]
    fn test_malformed_and_unknown_frames_are_silent() {
        assert!(decode_server_frame("this is not json").is_empty());
        assert!(decode_server_frame(r#"{"usageMetadata": {"tokens": 12}}"#).is_empty());
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails_instead_of_buffering() {
        // A disconnected client has no sink and a cleared ready flag;
        // sends must fail loudly, not queue into a buffer that will
        // never flush.
        let client = GeminiLiveClient {
            shared: Arc::new(Mutex::new(Shared {
                sink: None,
                setup_complete: false,
                pending: VecDeque::new(),
            })),
            reader: None,
        };

        let err = client.send_audio_chunk("AAAA", 16000).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
        assert!(client.shared.lock().await.pending.is_empty());
    }

    #[test]
    fn test_prehandshake_buffering_is_fifo_exactly_once() {
        let mut shared = Shared {
            sink: None,
            setup_complete: false,
            pending: VecDeque::new(),
        };

        // Before setup completes, everything is buffered.
        assert!(shared.should_buffer());
        shared.pending.push_back("first".to_string());
        shared.pending.push_back("second".to_string());
        shared.pending.push_back("third".to_string());

        // The flush hands back the buffer in arrival order and flips
        // the ready flag, so later sends go straight to the wire.
        let flushed = shared.begin_flush();
        assert_eq!(flushed, vec!["first", "second", "third"]);
        assert!(!shared.should_buffer());
        assert!(shared.pending.is_empty());

        // A second flush has nothing left: exactly once.
        assert!(shared.begin_flush().is_empty());
    }
}
