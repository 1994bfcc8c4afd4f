//! Telephony media-stream bridge.
//!
//! Drives the same [`ConversationSession`] abstraction as the browser
//! manager, but speaks the carrier's media-stream protocol: 8 kHz
//! mu-law frames in both directions, with `start`/`media`/`stop`
//! envelope events. Transcript deltas are merged into caption buffers
//! and persisted only at turn boundaries and call finalization.

use super::{
    protocol::close_codes,
    provider::{ConversationSession, ProviderEvent, SessionError},
};
use crate::{
    audio,
    models::{CallChannel, CallStatus, TurnRole},
    state::AppState,
};
use anyhow::Result;
use axum::{
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::Engine;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;
use voicebridge_core::caption::CaptionBuffer;

/// Inbound carrier frames.
#[derive(Deserialize, Debug)]
#[serde(tag = "event", rename_all = "lowercase")]
enum CarrierMessage {
    Start {
        start: StartPayload,
    },
    Media {
        media: MediaPayload,
    },
    Stop,
}

#[derive(Deserialize, Debug)]
struct StartPayload {
    #[serde(rename = "streamSid")]
    stream_sid: String,
}

#[derive(Deserialize, Debug)]
struct MediaPayload {
    /// Base64 mu-law audio at 8 kHz.
    payload: String,
}

/// Outbound carrier media frame.
#[derive(Serialize, Debug)]
struct OutboundMedia<'a> {
    event: &'static str,
    #[serde(rename = "streamSid")]
    stream_sid: &'a str,
    media: OutboundPayload,
}

#[derive(Serialize, Debug)]
struct OutboundPayload {
    payload: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TelephonyParams {
    pub workspace_id: Option<Uuid>,
    /// Caller number as reported by the carrier.
    pub from: Option<String>,
}

/// Axum handler for inbound carrier media-stream connections.
pub async fn telephony_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<TelephonyParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(workspace_id) = params.workspace_id else {
            info!("Refusing telephony stream without a resolvable workspace");
            close_with(socket, close_codes::NO_WORKSPACE, "no workspace resolved").await;
            return;
        };
        let session_id = state.register_session(workspace_id, CallChannel::Phone);
        let span = tracing::info_span!("telephony_session", %session_id, %workspace_id);
        async {
            handle_stream(socket, state.clone(), session_id, workspace_id, params.from).await;
            state.unregister_session(session_id);
            info!("Telephony session closed");
        }
        .instrument(span)
        .await;
    })
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Per-call bridge state.
struct BridgeCall {
    conversation_id: Uuid,
    stream_sid: String,
    started_at: DateTime<Utc>,
    events: Option<mpsc::Receiver<ProviderEvent>>,
    caller_caption: CaptionBuffer,
    agent_caption: CaptionBuffer,
    finalized: bool,
}

impl BridgeCall {
    /// Flips the one-shot finalization flag. Returns `false` on every
    /// invocation after the first.
    fn begin_finalize(&mut self) -> bool {
        !std::mem::replace(&mut self.finalized, true)
    }
}

/// Whether an inbound carrier frame applies in the current call state.
/// Out-of-order frames (a duplicate `start`, `media` before `start`)
/// are dropped rather than answered: the carrier does not consume
/// error replies.
fn frame_applies(msg: &CarrierMessage, call_active: bool) -> bool {
    match msg {
        CarrierMessage::Start { .. } => !call_active,
        CarrierMessage::Media { .. } => call_active,
        CarrierMessage::Stop => true,
    }
}

async fn handle_stream(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: Uuid,
    workspace_id: Uuid,
    caller: Option<String>,
) {
    let settings = match state.db.get_workspace_settings(workspace_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            warn!("Unknown workspace on telephony stream");
            close_with(socket, close_codes::NO_WORKSPACE, "workspace not found").await;
            return;
        }
        Err(e) => {
            error!(error = ?e, "Failed to load workspace settings");
            close_with(socket, close_codes::NO_WORKSPACE, "workspace lookup failed").await;
            return;
        }
    };

    let mut conversation = match ConversationSession::new(settings, &state.config) {
        Ok(conversation) => conversation,
        Err(SessionError::MissingCredential) => {
            error!("No provider credential configured; refusing telephony stream");
            close_with(socket, close_codes::NO_WORKSPACE, "provider not configured").await;
            return;
        }
        Err(e) => {
            error!(error = ?e, "Failed to initialize conversation session");
            return;
        }
    };

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut call: Option<BridgeCall> = None;

    loop {
        tokio::select! {
            msg = socket_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<CarrierMessage>(&text) {
                            Ok(msg) if !frame_applies(&msg, call.is_some()) => {
                                warn!("Carrier frame out of order for the call state; dropping");
                            }
                            Ok(CarrierMessage::Start { start }) => {
                                match start_call(
                                    &state, session_id, workspace_id,
                                    caller.as_deref(), &mut conversation, start.stream_sid,
                                ).await {
                                    Ok(started) => call = Some(started),
                                    Err(e) => {
                                        error!(error = ?e, "Failed to start telephony call");
                                        break;
                                    }
                                }
                            }
                            Ok(CarrierMessage::Media { media }) => {
                                forward_caller_audio(&conversation, &media.payload).await;
                            }
                            Ok(CarrierMessage::Stop) => {
                                info!("Carrier sent stop");
                                break;
                            }
                            Err(e) => {
                                warn!(error = %e, "Unparseable carrier frame; ignoring");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Carrier closed the stream");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Carrier socket error");
                        break;
                    }
                }
            },
            event = recv_provider(&mut call) => {
                match event {
                    Some(event) => {
                        if handle_provider_event(
                            &state, &mut socket_tx, &mut conversation, &mut call, event,
                        ).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        if let Some(call) = &mut call {
                            call.events = None;
                        }
                    }
                }
            },
        }
    }

    finalize(&state, session_id, &mut conversation, &mut call).await;
}

async fn recv_provider(call: &mut Option<BridgeCall>) -> Option<ProviderEvent> {
    match call.as_mut().and_then(|call| call.events.as_mut()) {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn start_call(
    state: &Arc<AppState>,
    session_id: Uuid,
    workspace_id: Uuid,
    caller: Option<&str>,
    conversation: &mut ConversationSession,
    stream_sid: String,
) -> Result<BridgeCall> {
    let contact_id = match caller {
        Some(number) => state
            .db
            .find_contact_by_phone(workspace_id, number)
            .await
            .unwrap_or_else(|e| {
                warn!(error = ?e, "Contact lookup failed");
                None
            }),
        None => None,
    };

    let conversation_id = Uuid::new_v4();
    let events = conversation.start_conversation(conversation_id).await?;

    state
        .db
        .create_call(
            conversation_id,
            workspace_id,
            contact_id,
            CallChannel::Phone,
            serde_json::json!({ "stream_sid": stream_sid, "caller": caller }),
        )
        .await?;

    state.set_session_conversation(session_id, Some(conversation_id));
    info!(%conversation_id, %stream_sid, "Telephony call started");

    Ok(BridgeCall {
        conversation_id,
        stream_sid,
        started_at: Utc::now(),
        events: Some(events),
        caller_caption: CaptionBuffer::new(),
        agent_caption: CaptionBuffer::new(),
        finalized: false,
    })
}

/// Decodes one inbound carrier media frame (base64 mu-law @8 kHz) to
/// PCM16 and forwards it. The Live API accepts the native telephony
/// rate; no upsampling happens on this path.
async fn forward_caller_audio(conversation: &ConversationSession, payload: &str) {
    let mulaw = match base64::engine::general_purpose::STANDARD.decode(payload) {
        Ok(bytes) => bytes,
        Err(_) => {
            warn!("Malformed base64 in carrier media frame");
            return;
        }
    };
    let pcm = audio::mulaw_decode_slice(&mulaw);
    let encoded = audio::encode_pcm16_base64(&pcm);
    if let Err(e) = conversation
        .send_audio(&encoded, audio::TELEPHONY_SAMPLE_RATE)
        .await
    {
        warn!(error = %e, "Failed to forward caller audio");
    }
}

async fn handle_provider_event(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    conversation: &mut ConversationSession,
    call: &mut Option<BridgeCall>,
    event: ProviderEvent,
) -> Result<()> {
    let Some(active) = call.as_mut() else { return Ok(()) };

    match event {
        ProviderEvent::Open | ProviderEvent::SetupComplete => Ok(()),
        ProviderEvent::SttDelta(delta) => {
            active.caller_caption.push(&delta);
            Ok(())
        }
        ProviderEvent::AgentDelta(delta) => {
            active.agent_caption.push(&delta);
            Ok(())
        }
        ProviderEvent::TtsAudio { pcm16_base64, sample_rate } => {
            let pcm = audio::decode_pcm16_base64(&pcm16_base64);
            let downsampled =
                audio::resample_pcm16(&pcm, sample_rate, audio::TELEPHONY_SAMPLE_RATE);
            let mulaw = audio::mulaw_encode_slice(&downsampled);
            let payload = base64::engine::general_purpose::STANDARD.encode(&mulaw);
            let frame = OutboundMedia {
                event: "media",
                stream_sid: &active.stream_sid,
                media: OutboundPayload { payload },
            };
            socket_tx
                .send(Message::Text(serde_json::to_string(&frame)?.into()))
                .await?;
            Ok(())
        }
        ProviderEvent::AgentComplete { .. } => {
            // The phone leg persists merged captions, not the raw
            // finalized texts, so overlapping fragments collapse.
            flush_captions(state, active).await;
            Ok(())
        }
        ProviderEvent::ToolCall(invocation) => {
            let result = match state
                .tool_executor
                .execute(&invocation.name, invocation.args.clone())
                .await
            {
                Ok(result) => result,
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            if let Err(e) = state
                .db
                .add_turn(
                    active.conversation_id,
                    TurnRole::Agent,
                    "",
                    Some(&invocation.name),
                    Some(&invocation.args),
                    Some(&result),
                )
                .await
            {
                warn!(error = ?e, "Failed to persist tool invocation");
            }
            if let Err(e) = conversation
                .send_tool_result(&invocation.id, &invocation.name, result)
                .await
            {
                warn!(error = %e, "Failed to return tool result to provider");
            }
            Ok(())
        }
        ProviderEvent::Error(message) => {
            warn!(%message, "Provider error during telephony call");
            Ok(())
        }
        ProviderEvent::Closed => {
            warn!("Provider connection closed mid-call");
            anyhow::bail!("provider connection closed")
        }
    }
}

/// Writes both caption buffers out as turn records and clears them.
async fn flush_captions(state: &Arc<AppState>, call: &mut BridgeCall) {
    for (buffer, role) in [
        (&mut call.caller_caption, TurnRole::User),
        (&mut call.agent_caption, TurnRole::Agent),
    ] {
        if buffer.is_empty() {
            continue;
        }
        let text = buffer.take();
        if let Err(e) = state
            .db
            .add_turn(call.conversation_id, role, &text, None, None, None)
            .await
        {
            warn!(error = ?e, "Failed to persist caption turn");
        }
    }
}

/// Idempotent call teardown. Every step's failure is logged and
/// swallowed so the socket resource is always released.
async fn finalize(
    state: &Arc<AppState>,
    session_id: Uuid,
    conversation: &mut ConversationSession,
    call: &mut Option<BridgeCall>,
) {
    let Some(active) = call.as_mut() else {
        conversation.disconnect().await;
        return;
    };
    if !active.begin_finalize() {
        return;
    }

    let (outcome, _unflushed) = conversation.end_conversation().await;
    let duration_sec = (Utc::now() - active.started_at).num_seconds();

    // Captions may still hold a fragment that never hit a turn
    // boundary; flush it before closing the record.
    flush_captions(state, active).await;

    if let Err(e) = state
        .db
        .finalize_call(
            active.conversation_id,
            CallStatus::Completed,
            &outcome.summary,
            &outcome.intent,
            duration_sec as i32,
        )
        .await
    {
        warn!(error = ?e, "Failed to finalize telephony call record");
    }

    conversation.disconnect().await;
    state.set_session_conversation(session_id, None);
    info!(
        conversation_id = %active.conversation_id,
        duration_sec,
        "Telephony call finalized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_carrier_start_frame_parsing() {
        let msg: CarrierMessage = serde_json::from_str(
            r#"{"event": "start", "start": {"streamSid": "MZ0123"}}"#,
        )
        .unwrap();
        match msg {
            CarrierMessage::Start { start } => assert_eq!(start.stream_sid, "MZ0123"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_carrier_media_frame_parsing() {
        let msg: CarrierMessage =
            serde_json::from_str(r#"{"event": "media", "media": {"payload": "f39/fw=="}}"#)
                .unwrap();
        match msg {
            CarrierMessage::Media { media } => assert_eq!(media.payload, "f39/fw=="),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_carrier_stop_and_unknown_frames() {
        let msg: CarrierMessage = serde_json::from_str(r#"{"event": "stop"}"#).unwrap();
        assert!(matches!(msg, CarrierMessage::Stop));

        let result: Result<CarrierMessage, _> =
            serde_json::from_str(r#"{"event": "mark", "mark": {}}"#);
        assert!(result.is_err());
    }

    fn bridge_call() -> BridgeCall {
        BridgeCall {
            conversation_id: Uuid::new_v4(),
            stream_sid: "MZ0123".to_string(),
            started_at: Utc::now(),
            events: None,
            caller_caption: CaptionBuffer::new(),
            agent_caption: CaptionBuffer::new(),
            finalized: false,
        }
    }

    #[test]
    fn test_finalization_is_one_shot() {
        let mut call = bridge_call();
        assert!(call.begin_finalize());
        // Every later attempt is a no-op, however it is triggered.
        assert!(!call.begin_finalize());
        assert!(!call.begin_finalize());
    }

    #[test]
    fn test_duplicate_start_frame_is_dropped() {
        let start: CarrierMessage =
            serde_json::from_str(r#"{"event": "start", "start": {"streamSid": "MZ9"}}"#).unwrap();
        assert!(frame_applies(&start, false));
        assert!(!frame_applies(&start, true));
    }

    #[test]
    fn test_media_before_start_is_dropped() {
        let media: CarrierMessage =
            serde_json::from_str(r#"{"event": "media", "media": {"payload": "AAAA"}}"#).unwrap();
        assert!(!frame_applies(&media, false));
        assert!(frame_applies(&media, true));
    }

    #[test]
    fn test_stop_applies_in_any_state() {
        let stop: CarrierMessage = serde_json::from_str(r#"{"event": "stop"}"#).unwrap();
        assert!(frame_applies(&stop, false));
        assert!(frame_applies(&stop, true));
    }

    #[test]
    fn test_outbound_media_frame_shape() {
        let frame = OutboundMedia {
            event: "media",
            stream_sid: "MZ0123",
            media: OutboundPayload { payload: "AAAA".to_string() },
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ0123");
        assert_eq!(json["media"]["payload"], "AAAA");
    }

    #[test]
    fn test_media_round_trip_preserves_frame_length() {
        // 160 bytes of mu-law (one 20 ms frame) must come back as 160
        // bytes after the inbound decode and the outbound re-encode.
        let inbound: Vec<u8> = (0..160).map(|i| (i * 3 % 256) as u8).collect();
        let pcm = audio::mulaw_decode_slice(&inbound);
        let up = audio::resample_pcm16(&pcm, 8000, 16000);
        let down = audio::resample_pcm16(&up, 16000, 8000);
        assert_eq!(audio::mulaw_encode_slice(&down).len(), inbound.len());
    }
}
