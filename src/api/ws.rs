//! Live chat stream over WebSocket.
//!
//! Browsers cannot set headers on the upgrade request, so the session token
//! comes in the `token` query parameter. Rejected client frames are answered
//! with `{"type":"error","error":{...}}` using the regular API error body.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::access::Actor;
use crate::db::{ChatRoom, Message, SendMessageRequest};
use crate::workflow::chat_gate::{authorize_room, can_chat};
use crate::workflow::WorkflowError;
use crate::AppState;

use super::auth::{resolve_user, CurrentUser};
use super::chat::{mark_read, post_message};
use super::error::ApiError;

/// How often an open stream re-checks that the pair may still chat
const GATE_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

const LOCKED_FRAME: &str = r#"{"type":"locked"}"#;

#[derive(Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// Outcome of one text frame from the client
#[derive(Debug)]
enum Inbound {
    /// Stored and published; the echo arrives through the broadcast
    Sent,
    /// Error frame to send back; the stream stays open
    Reject(String),
    /// The pair may no longer chat
    Locked,
}

/// GET /api/chat/rooms/:id/stream?token=
pub async fn chat_stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<WsAuthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    let user = resolve_user(&state.db, &token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;
    let room = authorize_room(&state.db, &user.actor, &room_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_chat_stream(socket, state, user, room)))
}

fn error_frame(err: ApiError) -> String {
    serde_json::json!({ "type": "error", "error": err.into_body() }).to_string()
}

/// Validate and store one client frame
async fn handle_inbound(state: &AppState, actor: &Actor, room_id: &str, text: &str) -> Inbound {
    let request = match serde_json::from_str::<SendMessageRequest>(text) {
        Ok(request) => request,
        Err(_) => {
            return Inbound::Reject(error_frame(ApiError::bad_request(
                "Expected a JSON object with a content field",
            )))
        }
    };

    // The appointment may have ended since the upgrade
    let room = match authorize_room(&state.db, actor, room_id).await {
        Ok(room) => room,
        Err(WorkflowError::ChatLocked) => return Inbound::Locked,
        Err(e) => return Inbound::Reject(error_frame(e.into())),
    };

    match post_message(state, &room, &actor.id, &request.content).await {
        Ok(_) => Inbound::Sent,
        Err(e) => {
            tracing::debug!(room_id = %room.id, error = %e, "Rejected streamed message");
            Inbound::Reject(error_frame(e))
        }
    }
}

/// Encode a broadcast message for `reader_id`, marking it read when it came
/// from the other participant
async fn deliver(state: &AppState, reader_id: &str, message: &Message) -> Option<String> {
    if message.sender_id != reader_id {
        if let Err(e) = mark_read(&state.db, &message.chat_room_id, reader_id).await {
            tracing::warn!(room_id = %message.chat_room_id, error = %e, "Failed to mark messages read");
        }
    }
    match serde_json::to_string(message) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode chat message");
            None
        }
    }
}

/// Whether the room's pair still has a confirmed appointment. Lookup
/// failures keep the stream open.
async fn gate_open(state: &AppState, room: &ChatRoom) -> bool {
    match can_chat(&state.db, &room.patient_id, &room.therapist_id).await {
        Ok(open) => open,
        Err(e) => {
            tracing::warn!(room_id = %room.id, error = %e, "Chat gate check failed");
            true
        }
    }
}

async fn handle_chat_stream(socket: WebSocket, state: Arc<AppState>, user: CurrentUser, room: ChatRoom) {
    let (mut sender, mut receiver) = socket.split();
    let mut messages = state.realtime.subscribe(&room.id);
    let mut gate_check = interval(GATE_RECHECK_INTERVAL);
    gate_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    gate_check.tick().await;

    tracing::debug!(room_id = %room.id, user_id = %user.id(), "Chat stream opened");

    loop {
        tokio::select! {
            received = messages.recv() => {
                let message = match received {
                    Ok(message) => message,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(room_id = %room.id, skipped, "Chat stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(payload) = deliver(&state, user.id(), &message).await else {
                    continue;
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }

            _ = gate_check.tick() => {
                if !gate_open(&state, &room).await {
                    let _ = sender.send(WsMessage::Text(LOCKED_FRAME.into())).await;
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match handle_inbound(&state, &user.actor, &room.id, &text).await {
                            Inbound::Sent => {}
                            Inbound::Reject(frame) => {
                                if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                                    break;
                                }
                            }
                            Inbound::Locked => {
                                let _ = sender.send(WsMessage::Text(LOCKED_FRAME.into())).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    drop(messages);
    state.realtime.release(&room.id);
    tracing::debug!(room_id = %room.id, user_id = %user.id(), "Chat stream closed");
}
