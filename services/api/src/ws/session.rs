//! Browser WebSocket session management.
//!
//! One inbound browser socket maps 1:1 to one [`ConversationSession`].
//! The socket outlives individual calls: after `call.stop` the client
//! may send another `call.start` on the same connection.

use super::{
    protocol::{ClientMessage, ServerMessage, close_codes, codes},
    provider::{ConversationSession, ProviderEvent, SessionError},
};
use crate::{
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
use chrono::{DateTime, Utc};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, error, info, instrument, warn};
use uuid::Uuid;
use voicebridge_core::tools::ToolInvocation;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CallWsParams {
    /// Workspace identity. Token parsing happens upstream; by the time
    /// this handler runs, an authenticated client carries the resolved
    /// workspace id.
    pub workspace_id: Option<Uuid>,
    #[allow(dead_code)]
    pub token: Option<String>,
}

/// Axum handler to upgrade an HTTP connection to a browser call socket.
pub async fn call_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<CallWsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let Some(workspace_id) = params.workspace_id else {
            info!("Rejecting browser socket without workspace identity");
            close_with(socket, close_codes::UNAUTHENTICATED, "missing workspace identity").await;
            return;
        };
        let session_id = state.register_session(workspace_id, CallChannel::Web);
        let span = tracing::info_span!("browser_session", %session_id, %workspace_id);
        async {
            handle_socket(socket, state.clone(), session_id, workspace_id).await;
            state.unregister_session(session_id);
            info!("Browser session closed");
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

/// State for the one call that may be active on this socket.
struct ActiveCall {
    conversation_id: Uuid,
    started_at: DateTime<Utc>,
    /// `None` once the provider event pump has ended, so the select
    /// loop stops polling a dead channel.
    events: Option<mpsc::Receiver<ProviderEvent>>,
}

#[instrument(name = "browser_socket", skip_all)]
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: Uuid,
    workspace_id: Uuid,
) {
    let (mut socket_tx, socket_rx) = socket.split();

    let settings = match state.db.get_workspace_settings(workspace_id).await {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            warn!("Unknown workspace on browser socket");
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    code: codes::UNKNOWN_WORKSPACE.to_string(),
                    message: "workspace not found".to_string(),
                },
            )
            .await;
            return;
        }
        Err(e) => {
            error!(error = ?e, "Failed to load workspace settings");
            return;
        }
    };

    let mut conversation = match ConversationSession::new(settings, &state.config) {
        Ok(conversation) => conversation,
        Err(SessionError::MissingCredential) => {
            error!("No provider credential configured; refusing session");
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    code: codes::PROVIDER_ERROR.to_string(),
                    message: "voice provider is not configured".to_string(),
                },
            )
            .await;
            return;
        }
        Err(e) => {
            error!(error = ?e, "Failed to initialize conversation session");
            return;
        }
    };

    if send_msg(&mut socket_tx, ServerMessage::Connected).await.is_err() {
        return;
    }

    if let Err(e) = run_call_loop(
        &state,
        &mut socket_tx,
        socket_rx,
        session_id,
        workspace_id,
        &mut conversation,
    )
    .await
    {
        error!(error = ?e, "Browser session terminated with error");
    }

    conversation.disconnect().await;
}

/// The main event loop: client messages on one side, provider events
/// on the other. Per-message failures become `error` replies and never
/// take down the loop.
async fn run_call_loop(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    session_id: Uuid,
    workspace_id: Uuid,
    conversation: &mut ConversationSession,
) -> Result<()> {
    let mut active: Option<ActiveCall> = None;

    loop {
        tokio::select! {
            msg = socket_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                handle_client_message(
                                    state, socket_tx, session_id, workspace_id,
                                    conversation, &mut active, msg,
                                ).await?;
                            }
                            Err(e) => {
                                warn!(error = %e, "Malformed client message");
                                send_msg(socket_tx, ServerMessage::Error {
                                    code: codes::INVALID_MESSAGE.to_string(),
                                    message: "could not parse message".to_string(),
                                }).await?;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the socket");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Error receiving from client socket");
                        break;
                    }
                }
            },
            event = recv_provider(&mut active) => {
                match event {
                    Some(event) => {
                        handle_provider_event(
                            state, socket_tx, session_id, conversation, &mut active, event,
                        ).await?;
                    }
                    // The pump ended without a Closed event; stop
                    // polling a dead channel.
                    None => {
                        if let Some(call) = &mut active {
                            call.events = None;
                        }
                    }
                }
            },
        }
    }

    // Socket is gone: finalize any in-flight call exactly once.
    if active.is_some() {
        finalize_call(state, session_id, conversation, &mut active, CallStatus::Failed).await;
    }
    Ok(())
}

/// Receives the next provider event, or pends forever when no call is
/// active so the select loop only wakes for client traffic.
async fn recv_provider(active: &mut Option<ActiveCall>) -> Option<ProviderEvent> {
    match active.as_mut().and_then(|call| call.events.as_mut()) {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

/// Stateless policy checks that precede any provider or database work.
/// Returns the error reply for a message that is invalid in the
/// current call state: a second `call.start` while a call is active is
/// rejected (the client must stop the current call first), and
/// `audio.chunk` / `call.stop` require an active call.
fn precheck_client_message(msg: &ClientMessage, call_active: bool) -> Option<ServerMessage> {
    match msg {
        ClientMessage::CallStart if call_active => Some(ServerMessage::Error {
            code: codes::CALL_ALREADY_ACTIVE.to_string(),
            message: "a call is already active on this connection".to_string(),
        }),
        ClientMessage::AudioChunk { .. } | ClientMessage::CallStop if !call_active => {
            Some(ServerMessage::Error {
                code: codes::NO_ACTIVE_CALL.to_string(),
                message: "no call is active".to_string(),
            })
        }
        _ => None,
    }
}

async fn handle_client_message(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    session_id: Uuid,
    workspace_id: Uuid,
    conversation: &mut ConversationSession,
    active: &mut Option<ActiveCall>,
    msg: ClientMessage,
) -> Result<()> {
    if let Some(reply) = precheck_client_message(&msg, active.is_some()) {
        return send_msg(socket_tx, reply).await;
    }

    match msg {
        ClientMessage::CallStart => {
            let conversation_id = Uuid::new_v4();
            let events = match conversation.start_conversation(conversation_id).await {
                Ok(events) => events,
                Err(e) => {
                    error!(error = %e, "Failed to start conversation");
                    return send_msg(socket_tx, ServerMessage::Error {
                        code: codes::START_FAILED.to_string(),
                        message: "could not start the call".to_string(),
                    }).await;
                }
            };

            if let Err(e) = state
                .db
                .create_call(
                    conversation_id,
                    workspace_id,
                    None,
                    CallChannel::Web,
                    serde_json::json!({}),
                )
                .await
            {
                error!(error = ?e, "Failed to create call record");
                conversation.disconnect().await;
                return send_msg(socket_tx, ServerMessage::Error {
                    code: codes::START_FAILED.to_string(),
                    message: "could not start the call".to_string(),
                }).await;
            }

            *active = Some(ActiveCall {
                conversation_id,
                started_at: Utc::now(),
                events: Some(events),
            });
            state.set_session_conversation(session_id, Some(conversation_id));
            info!(%conversation_id, "Call started");
            send_msg(socket_tx, ServerMessage::CallStarted { conversation_id }).await
        }
        ClientMessage::AudioChunk { pcm16_chunk_base64, sample_rate, seq: _ } => {
            if let Err(e) = conversation.send_audio(&pcm16_chunk_base64, sample_rate).await {
                warn!(error = %e, "Failed to forward audio chunk");
            }
            Ok(())
        }
        ClientMessage::CallStop => {
            let (conversation_id, summary, intent, duration_sec) =
                match finalize_call(state, session_id, conversation, active, CallStatus::Completed)
                    .await
                {
                    Some(ended) => ended,
                    None => return Ok(()),
                };
            send_msg(socket_tx, ServerMessage::CallEnded {
                conversation_id,
                summary,
                intent,
                duration_sec,
            }).await
        }
    }
}

async fn handle_provider_event(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    session_id: Uuid,
    conversation: &mut ConversationSession,
    active: &mut Option<ActiveCall>,
    event: ProviderEvent,
) -> Result<()> {
    match event {
        ProviderEvent::Open | ProviderEvent::SetupComplete => Ok(()),
        ProviderEvent::SttDelta(text_delta) => {
            send_msg(socket_tx, ServerMessage::SttDelta { text_delta }).await
        }
        ProviderEvent::AgentDelta(text_delta) => {
            send_msg(socket_tx, ServerMessage::AgentDelta { text_delta }).await
        }
        ProviderEvent::TtsAudio { pcm16_base64, sample_rate: _ } => {
            send_msg(socket_tx, ServerMessage::TtsAudio {
                pcm16_chunk_base64: pcm16_base64,
            }).await
        }
        ProviderEvent::AgentComplete { user_text, agent_text } => {
            let Some(call) = active.as_ref() else { return Ok(()) };
            persist_turn(state, call.conversation_id, TurnRole::User, user_text).await;
            persist_turn(state, call.conversation_id, TurnRole::Agent, agent_text).await;
            Ok(())
        }
        ProviderEvent::ToolCall(invocation) => {
            run_tool_round_trip(state, socket_tx, conversation, active, invocation).await
        }
        ProviderEvent::Error(message) => {
            warn!(%message, "Provider error during call");
            send_msg(socket_tx, ServerMessage::Error {
                code: codes::PROVIDER_ERROR.to_string(),
                message,
            }).await
        }
        ProviderEvent::Closed => {
            // The provider dropped mid-call; end the call as failed
            // but keep the browser socket open for a retry.
            warn!("Provider connection closed mid-call");
            if active.is_some() {
                finalize_call(state, session_id, conversation, active, CallStatus::Failed).await;
                send_msg(socket_tx, ServerMessage::Error {
                    code: codes::PROVIDER_ERROR.to_string(),
                    message: "the voice connection was closed".to_string(),
                }).await?;
            }
            Ok(())
        }
    }
}

/// Forwards the tool call to the client for visibility, executes it,
/// and feeds the result back into the conversation.
async fn run_tool_round_trip(
    state: &Arc<AppState>,
    socket_tx: &mut SplitSink<WebSocket, Message>,
    conversation: &mut ConversationSession,
    active: &mut Option<ActiveCall>,
    invocation: ToolInvocation,
) -> Result<()> {
    send_msg(socket_tx, ServerMessage::ToolCall {
        tool_call_id: invocation.id.clone(),
        name: invocation.name.clone(),
        args: invocation.args.clone(),
    }).await?;

    let result = match state
        .tool_executor
        .execute(&invocation.name, invocation.args.clone())
        .await
    {
        Ok(result) => result,
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    };

    if let Some(call) = active.as_ref() {
        if let Err(e) = state
            .db
            .add_turn(
                call.conversation_id,
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
    }

    if let Err(e) = conversation
        .send_tool_result(&invocation.id, &invocation.name, result)
        .await
    {
        warn!(error = %e, "Failed to return tool result to provider");
    }
    Ok(())
}

async fn persist_turn(
    state: &Arc<AppState>,
    conversation_id: Uuid,
    role: TurnRole,
    text: Option<String>,
) {
    let Some(text) = text else { return };
    if let Err(e) = state
        .db
        .add_turn(conversation_id, role, &text, None, None, None)
        .await
    {
        warn!(error = ?e, "Failed to persist turn");
    }
}

/// Ends the active call: summary, persisted residual turns, finalized
/// call record. Persistence failures are logged and swallowed so the
/// channel is always released. Returns the reply fields, or `None`
/// when no call was active.
async fn finalize_call(
    state: &Arc<AppState>,
    session_id: Uuid,
    conversation: &mut ConversationSession,
    active: &mut Option<ActiveCall>,
    status: CallStatus,
) -> Option<(Uuid, String, String, i64)> {
    let call = active.take()?;
    let (outcome, unflushed) = conversation.end_conversation().await;
    let duration_sec = (Utc::now() - call.started_at).num_seconds();

    for turn in unflushed {
        let role = match turn.role {
            voicebridge_core::transcript::SpeakerRole::User => TurnRole::User,
            voicebridge_core::transcript::SpeakerRole::Agent => TurnRole::Agent,
        };
        persist_turn(state, call.conversation_id, role, Some(turn.text)).await;
    }

    if let Err(e) = state
        .db
        .finalize_call(
            call.conversation_id,
            status,
            &outcome.summary,
            &outcome.intent,
            duration_sec as i32,
        )
        .await
    {
        warn!(error = ?e, "Failed to finalize call record");
    }

    conversation.disconnect().await;
    state.set_session_conversation(session_id, None);
    info!(conversation_id = %call.conversation_id, duration_sec, "Call ended");
    Some((call.conversation_id, outcome.summary, outcome.intent, duration_sec))
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
