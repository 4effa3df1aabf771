//! Chat gate: a room between a patient and a therapist is usable only while
//! they share a confirmed appointment.
//!
//! Rooms are created lazily. `chat_rooms` has a unique `(patient_id,
//! therapist_id)` constraint, so concurrent openers converge on one row.

use sqlx::SqlitePool;
use tracing::info;

use super::WorkflowError;
use crate::access::{Actor, Capability};
use crate::db::{now, ChatRoom, Role};

pub async fn can_chat(
    db: &SqlitePool,
    patient_id: &str,
    therapist_id: &str,
) -> Result<bool, sqlx::Error> {
    let exists: i64 = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM appointments
            WHERE patient_id = ? AND therapist_id = ? AND status = 'confirmed'
        )
        "#,
    )
    .bind(patient_id)
    .bind(therapist_id)
    .fetch_one(db)
    .await?;
    Ok(exists != 0)
}

/// Return the pair's room, creating it on first use.
///
/// Fails with `ChatLocked` when the pair has no confirmed appointment.
pub async fn get_or_create_room(
    db: &SqlitePool,
    patient_id: &str,
    therapist_id: &str,
) -> Result<ChatRoom, WorkflowError> {
    if !can_chat(db, patient_id, therapist_id).await? {
        return Err(WorkflowError::ChatLocked);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = now();
    let inserted = sqlx::query(
        r#"
        INSERT INTO chat_rooms (id, patient_id, therapist_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (patient_id, therapist_id) DO NOTHING
        "#,
    )
    .bind(&id)
    .bind(patient_id)
    .bind(therapist_id)
    .bind(&now)
    .bind(&now)
    .execute(db)
    .await?;

    if inserted.rows_affected() > 0 {
        info!(room_id = %id, patient_id, therapist_id, "Chat room created");
    }

    let room = sqlx::query_as("SELECT * FROM chat_rooms WHERE patient_id = ? AND therapist_id = ?")
        .bind(patient_id)
        .bind(therapist_id)
        .fetch_one(db)
        .await?;
    Ok(room)
}

/// Open (or reopen) the caller's room with `counterpart_id`
pub async fn open_room(
    db: &SqlitePool,
    actor: &Actor,
    counterpart_id: &str,
) -> Result<ChatRoom, WorkflowError> {
    actor.require(Capability::Chat)?;
    match actor.role {
        Role::Patient => get_or_create_room(db, &actor.id, counterpart_id).await,
        Role::Psychologue => get_or_create_room(db, counterpart_id, &actor.id).await,
        Role::Admin => Err(WorkflowError::NotAllowed("Admins do not take part in chats")),
    }
}

/// Load a room for a participant, re-checking the gate.
///
/// Non-participants get `NotFound`; a pair whose confirmed appointment has
/// since been cancelled or completed gets `ChatLocked`.
pub async fn authorize_room(
    db: &SqlitePool,
    actor: &Actor,
    room_id: &str,
) -> Result<ChatRoom, WorkflowError> {
    actor.require(Capability::Chat)?;

    let room: ChatRoom = sqlx::query_as("SELECT * FROM chat_rooms WHERE id = ?")
        .bind(room_id)
        .fetch_optional(db)
        .await?
        .ok_or(WorkflowError::NotFound("Chat room"))?;

    if !room.has_participant(&actor.id) {
        return Err(WorkflowError::NotFound("Chat room"));
    }
    if !can_chat(db, &room.patient_id, &room.therapist_id).await? {
        return Err(WorkflowError::ChatLocked);
    }
    Ok(room)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_pool, AppointmentStatus, UpdateAppointmentStatusRequest};
    use crate::workflow::appointments::tests::{insert_profile, request};
    use crate::workflow::appointments::{book, transition};
    use chrono::{Duration, Utc};

    async fn seeded() -> (SqlitePool, Actor, Actor) {
        let db = test_pool().await;
        insert_profile(&db, "p", Role::Patient, false).await;
        insert_profile(&db, "t", Role::Psychologue, true).await;
        (
            db,
            Actor::new("p", Role::Patient, false),
            Actor::new("t", Role::Psychologue, true),
        )
    }

    async fn set_status(db: &SqlitePool, actor: &Actor, id: &str, next: AppointmentStatus) {
        let req = UpdateAppointmentStatusRequest {
            status: next,
            appointment_date: None,
        };
        transition(db, actor, id, &req, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_no_room_without_confirmed_appointment() {
        let (db, patient, _) = seeded().await;
        let now = Utc::now();
        book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();

        let err = open_room(&db, &patient, "t").await.unwrap_err();
        assert!(matches!(err, WorkflowError::ChatLocked));

        let rooms: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_rooms")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(rooms, 0);
    }

    #[tokio::test]
    async fn test_both_sides_converge_on_one_room() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();
        let appt = book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();
        set_status(&db, &therapist, &appt.id, AppointmentStatus::Confirmed).await;

        let (a, b) = tokio::join!(open_room(&db, &patient, "t"), open_room(&db, &therapist, "p"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);

        let again = get_or_create_room(&db, "p", "t").await.unwrap();
        assert_eq!(again.id, a.id);
    }

    #[tokio::test]
    async fn test_cancellation_locks_existing_room() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();
        let appt = book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();
        set_status(&db, &therapist, &appt.id, AppointmentStatus::Confirmed).await;
        let room = open_room(&db, &patient, "t").await.unwrap();
        assert!(authorize_room(&db, &patient, &room.id).await.is_ok());

        set_status(&db, &therapist, &appt.id, AppointmentStatus::Cancelled).await;
        let err = authorize_room(&db, &patient, &room.id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ChatLocked));
    }

    #[tokio::test]
    async fn test_pending_therapist_cannot_chat() {
        let (db, _, _) = seeded().await;
        let pending = Actor::new("t2", Role::Psychologue, false);
        let err = open_room(&db, &pending, "p").await.unwrap_err();
        assert!(matches!(err, WorkflowError::Access(_)));
    }
}
