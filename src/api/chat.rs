use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;

use crate::access::Capability;
use crate::db::{
    actions, now, resource_types, ChatRoom, ChatRoomSummary, Message, OpenRoomRequest,
    ProfileSummary, SendMessageRequest,
};
use crate::workflow::chat_gate::{authorize_room, open_room};
use crate::AppState;

use super::audit::audit_log;
use super::auth::CurrentUser;
use super::error::ApiError;
use super::validation::{validate_text, MAX_MESSAGE_LENGTH};

#[derive(FromRow)]
struct RoomRow {
    #[sqlx(flatten)]
    room: ChatRoom,
    counterpart_name: Option<String>,
    counterpart_avatar: Option<String>,
    counterpart_role: Option<String>,
    counterpart_verified: Option<bool>,
    unread_count: i64,
}

async fn last_message(db: &SqlitePool, room_id: &str) -> Result<Option<Message>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM messages WHERE chat_room_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(room_id)
    .fetch_optional(db)
    .await
}

/// Mark the messages the other participant sent in `room_id` as read.
/// Returns how many were updated.
pub(crate) async fn mark_read(
    db: &SqlitePool,
    room_id: &str,
    reader_id: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE messages SET read_at = ? WHERE chat_room_id = ? AND sender_id != ? AND read_at IS NULL",
    )
    .bind(now())
    .bind(room_id)
    .bind(reader_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected())
}

/// Store a message, bump the room and fan it out to live subscribers
pub(crate) async fn post_message(
    state: &AppState,
    room: &ChatRoom,
    sender_id: &str,
    content: &str,
) -> Result<Message, ApiError> {
    let content = content.trim();
    validate_text(content, "Message", MAX_MESSAGE_LENGTH)
        .map_err(|e| ApiError::validation_field("content", e))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now();

    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO messages (id, chat_room_id, sender_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&room.id)
    .bind(sender_id)
    .bind(content)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    sqlx::query("UPDATE chat_rooms SET updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&room.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let message = Message {
        id,
        chat_room_id: room.id.clone(),
        sender_id: sender_id.to_string(),
        content: content.to_string(),
        read_at: None,
        created_at: now,
    };
    state.realtime.publish(&message);
    Ok(message)
}

/// The caller's rooms whose pair still has a confirmed appointment,
/// most recently active first
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<ChatRoomSummary>>, ApiError> {
    user.actor.require(Capability::Chat)?;

    let rows: Vec<RoomRow> = sqlx::query_as(
        r#"
        SELECT r.*, c.full_name AS counterpart_name, c.avatar_url AS counterpart_avatar,
            c.role AS counterpart_role, c.is_verified AS counterpart_verified,
            (SELECT COUNT(*) FROM messages m
                WHERE m.chat_room_id = r.id AND m.sender_id != ?1 AND m.read_at IS NULL) AS unread_count
        FROM chat_rooms r
        LEFT JOIN profiles c
            ON c.id = CASE WHEN r.patient_id = ?1 THEN r.therapist_id ELSE r.patient_id END
        WHERE (r.patient_id = ?1 OR r.therapist_id = ?1)
            AND EXISTS (
                SELECT 1 FROM appointments a
                WHERE a.patient_id = r.patient_id AND a.therapist_id = r.therapist_id
                    AND a.status = 'confirmed'
            )
        ORDER BY r.updated_at DESC
        "#,
    )
    .bind(user.id())
    .fetch_all(&state.db)
    .await?;

    let mut rooms = Vec::with_capacity(rows.len());
    for row in rows {
        let counterpart_id = row.room.other_participant(user.id()).to_string();
        let counterpart = match (row.counterpart_name, row.counterpart_role) {
            (Some(full_name), Some(role)) => Some(ProfileSummary {
                id: counterpart_id,
                full_name,
                avatar_url: row.counterpart_avatar,
                role,
                is_verified: row.counterpart_verified.unwrap_or(false),
            }),
            _ => None,
        };
        rooms.push(ChatRoomSummary {
            last_message: last_message(&state.db, &row.room.id).await?,
            id: row.room.id,
            patient_id: row.room.patient_id,
            therapist_id: row.room.therapist_id,
            counterpart,
            unread_count: row.unread_count,
            updated_at: row.room.updated_at,
        });
    }

    Ok(Json(rooms))
}

pub async fn open_chat_room(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<OpenRoomRequest>,
) -> Result<Json<ChatRoom>, ApiError> {
    let room = open_room(&state.db, &user.actor, request.counterpart_id.trim()).await?;

    audit_log(
        &state,
        actions::CHAT_ROOM_OPEN,
        resource_types::CHAT_ROOM,
        Some(&room.id),
        Some(user.id()),
        None,
        None,
    )
    .await;

    Ok(Json(room))
}

/// Room history in send order. Reading marks the other party's messages read.
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let room = authorize_room(&state.db, &user.actor, &room_id).await?;
    mark_read(&state.db, &room.id, user.id()).await?;

    let messages: Vec<Message> = sqlx::query_as(
        "SELECT * FROM messages WHERE chat_room_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(&room.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(room_id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let room = authorize_room(&state.db, &user.actor, &room_id).await?;
    let message = post_message(&state, &room, user.id(), &request.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_room_read(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(room_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let room = authorize_room(&state.db, &user.actor, &room_id).await?;
    mark_read(&state.db, &room.id, user.id()).await?;
    Ok(StatusCode::NO_CONTENT)
}
