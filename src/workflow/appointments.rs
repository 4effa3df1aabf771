//! Booking and the appointment status state machine.
//!
//! Request validation that needs no storage runs first, so a booking for a
//! past date is refused without touching the database. Status updates are
//! compare-and-set on the current status, and the `appointments` table
//! carries a trigger that rejects any update off the graph.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use tracing::info;

use super::WorkflowError;
use crate::access::{Actor, Capability};
use crate::db::{
    find_profile, parse_timestamp, timestamp, Appointment, AppointmentResponse,
    AppointmentStatus, CreateAppointmentRequest, ProfileSummary, Role,
    UpdateAppointmentStatusRequest,
};

pub const ALLOWED_DURATIONS: [i64; 4] = [30, 60, 90, 120];
pub const DEFAULT_DURATION_MINUTES: i64 = 60;

/// A booking request that passed every check not needing storage
#[derive(Debug, Clone, PartialEq)]
pub struct ValidBooking {
    pub therapist_id: String,
    pub requested_date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub notes: Option<String>,
}

fn parse_future(value: &str, field: &'static str, now: DateTime<Utc>) -> Result<DateTime<Utc>, WorkflowError> {
    let at = parse_timestamp(value).ok_or(WorkflowError::InvalidDate { field })?;
    if at <= now {
        return Err(WorkflowError::PastDate { field });
    }
    Ok(at)
}

pub fn validate_booking(
    request: &CreateAppointmentRequest,
    now: DateTime<Utc>,
) -> Result<ValidBooking, WorkflowError> {
    let requested_date = parse_future(&request.requested_date, "requested_date", now)?;

    let duration_minutes = request.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
    if !ALLOWED_DURATIONS.contains(&duration_minutes) {
        return Err(WorkflowError::InvalidDuration(duration_minutes));
    }

    let notes = request
        .notes
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    Ok(ValidBooking {
        therapist_id: request.therapist_id.clone(),
        requested_date,
        duration_minutes,
        notes,
    })
}

/// Create a pending appointment for the calling patient
pub async fn book(
    db: &SqlitePool,
    actor: &Actor,
    request: &CreateAppointmentRequest,
    now: DateTime<Utc>,
) -> Result<Appointment, WorkflowError> {
    actor.require(Capability::BookAppointment)?;
    let booking = validate_booking(request, now)?;

    if booking.therapist_id == actor.id {
        return Err(WorkflowError::SelfBooking);
    }

    let therapist = find_profile(db, &booking.therapist_id)
        .await?
        .ok_or(WorkflowError::NotFound("Therapist"))?;
    if therapist.role_enum() != Role::Psychologue || !therapist.is_verified {
        return Err(WorkflowError::TherapistUnavailable);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let created_at = timestamp(now);
    sqlx::query(
        r#"
        INSERT INTO appointments (id, patient_id, therapist_id, status, requested_date,
            duration_minutes, notes, created_at, updated_at)
        VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&actor.id)
    .bind(&booking.therapist_id)
    .bind(timestamp(booking.requested_date))
    .bind(booking.duration_minutes)
    .bind(&booking.notes)
    .bind(&created_at)
    .bind(&created_at)
    .execute(db)
    .await?;

    info!(
        appointment_id = %id,
        patient_id = %actor.id,
        therapist_id = %booking.therapist_id,
        "Appointment requested"
    );

    fetch(db, &id).await
}

/// Check who may move `appointment` to `next`.
///
/// Callers unrelated to the appointment get `NotFound` unless they are admins.
pub fn authorize_transition(
    actor: &Actor,
    appointment: &Appointment,
    next: AppointmentStatus,
) -> Result<AppointmentStatus, WorkflowError> {
    let is_patient = actor.id == appointment.patient_id;
    let is_therapist = actor.id == appointment.therapist_id;
    if !is_patient && !is_therapist && !actor.is_admin() {
        return Err(WorkflowError::NotFound("Appointment"));
    }

    let current = appointment
        .status_enum()
        .map_err(|_| WorkflowError::NotAllowed("Appointment has an unknown status"))?;
    if !current.can_transition_to(next) {
        return Err(WorkflowError::InvalidTransition {
            from: current,
            to: next,
        });
    }

    match (current, next) {
        (_, AppointmentStatus::Confirmed) => {
            if !is_therapist {
                return Err(WorkflowError::NotAllowed(
                    "Only the addressed therapist can confirm this appointment",
                ));
            }
            actor.require(Capability::ManageAppointments)?;
        }
        (AppointmentStatus::Pending, AppointmentStatus::Cancelled) => {
            if is_therapist {
                actor.require(Capability::ManageAppointments)?;
            } else if !is_patient {
                return Err(WorkflowError::NotAllowed(
                    "Only the patient or the therapist can cancel this appointment",
                ));
            }
        }
        (_, AppointmentStatus::Cancelled) => {
            if !is_therapist {
                return Err(WorkflowError::NotAllowed(
                    "Only the therapist can cancel a confirmed appointment",
                ));
            }
            actor.require(Capability::ManageAppointments)?;
        }
        (_, AppointmentStatus::Completed) => {
            if is_therapist {
                actor.require(Capability::ManageAppointments)?;
            } else if actor.is_admin() {
                actor.require(Capability::CompleteAppointments)?;
            } else {
                return Err(WorkflowError::NotAllowed(
                    "Only the therapist or an admin can complete this appointment",
                ));
            }
        }
        (_, AppointmentStatus::Pending) => {
            return Err(WorkflowError::InvalidTransition {
                from: current,
                to: next,
            })
        }
    }

    Ok(current)
}

/// Apply a status change. Returns the updated row and the previous status.
pub async fn transition(
    db: &SqlitePool,
    actor: &Actor,
    appointment_id: &str,
    request: &UpdateAppointmentStatusRequest,
    now: DateTime<Utc>,
) -> Result<(Appointment, AppointmentStatus), WorkflowError> {
    let appointment_date = match &request.appointment_date {
        Some(_) if request.status != AppointmentStatus::Confirmed => {
            return Err(WorkflowError::NotAllowed(
                "appointment_date can only be set when confirming",
            ))
        }
        Some(value) => Some(parse_future(value, "appointment_date", now)?),
        None => None,
    };

    let appointment = fetch(db, appointment_id).await?;
    let previous = authorize_transition(actor, &appointment, request.status)?;

    let result = sqlx::query(
        r#"
        UPDATE appointments
        SET status = ?, appointment_date = COALESCE(?, appointment_date), updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(request.status.as_str())
    .bind(appointment_date.map(timestamp))
    .bind(timestamp(now))
    .bind(appointment_id)
    .bind(previous.as_str())
    .execute(db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(WorkflowError::StaleState);
    }

    info!(
        appointment_id = %appointment_id,
        actor_id = %actor.id,
        from = %previous,
        to = %request.status,
        "Appointment status changed"
    );

    Ok((fetch(db, appointment_id).await?, previous))
}

pub async fn fetch(db: &SqlitePool, appointment_id: &str) -> Result<Appointment, WorkflowError> {
    sqlx::query_as("SELECT * FROM appointments WHERE id = ?")
        .bind(appointment_id)
        .fetch_optional(db)
        .await?
        .ok_or(WorkflowError::NotFound("Appointment"))
}

#[derive(FromRow)]
struct AppointmentWithCounterpart {
    #[sqlx(flatten)]
    appointment: Appointment,
    counterpart_id: Option<String>,
    counterpart_name: Option<String>,
    counterpart_avatar: Option<String>,
    counterpart_role: Option<String>,
    counterpart_verified: Option<bool>,
}

impl From<AppointmentWithCounterpart> for AppointmentResponse {
    fn from(row: AppointmentWithCounterpart) -> Self {
        let counterpart = match (row.counterpart_id, row.counterpart_name, row.counterpart_role) {
            (Some(id), Some(full_name), Some(role)) => Some(ProfileSummary {
                id,
                full_name,
                avatar_url: row.counterpart_avatar,
                role,
                is_verified: row.counterpart_verified.unwrap_or(false),
            }),
            _ => None,
        };
        AppointmentResponse::new(row.appointment, counterpart)
    }
}

/// Appointments visible to the caller, newest first.
///
/// Patients and therapists see their own; admins see every appointment with
/// the patient as counterpart.
pub async fn list_for(
    db: &SqlitePool,
    actor: &Actor,
) -> Result<Vec<AppointmentResponse>, WorkflowError> {
    let scope = if actor.is_admin() {
        "1 = 1"
    } else {
        "(a.patient_id = ?2 OR a.therapist_id = ?2)"
    };
    let sql = format!(
        r#"
        SELECT a.*, c.id AS counterpart_id, c.full_name AS counterpart_name,
            c.avatar_url AS counterpart_avatar, c.role AS counterpart_role,
            c.is_verified AS counterpart_verified
        FROM appointments a
        LEFT JOIN profiles c
            ON c.id = CASE WHEN a.patient_id = ?1 THEN a.therapist_id ELSE a.patient_id END
        WHERE {}
        ORDER BY a.created_at DESC
        "#,
        scope
    );

    let mut query = sqlx::query_as::<_, AppointmentWithCounterpart>(&sql).bind(&actor.id);
    if !actor.is_admin() {
        query = query.bind(&actor.id);
    }
    let rows = query.fetch_all(db).await?;

    Ok(rows.into_iter().map(AppointmentResponse::from).collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{now, test_pool};
    use chrono::Duration;

    pub(crate) async fn insert_profile(db: &SqlitePool, id: &str, role: Role, verified: bool) {
        let now = now();
        sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, '', ?)")
            .bind(id)
            .bind(format!("{}@example.com", id))
            .bind(&now)
            .execute(db)
            .await
            .unwrap();
        sqlx::query(
            r#"INSERT INTO profiles (id, email, full_name, role, is_verified, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(format!("{}@example.com", id))
        .bind(format!("User {}", id))
        .bind(role.as_str())
        .bind(verified)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await
        .unwrap();
    }

    pub(crate) fn request(therapist_id: &str, at: DateTime<Utc>) -> CreateAppointmentRequest {
        CreateAppointmentRequest {
            therapist_id: therapist_id.to_string(),
            requested_date: timestamp(at),
            duration_minutes: None,
            notes: Some("  first session  ".to_string()),
        }
    }

    fn status(next: AppointmentStatus) -> UpdateAppointmentStatusRequest {
        UpdateAppointmentStatusRequest {
            status: next,
            appointment_date: None,
        }
    }

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

    #[test]
    fn test_validate_booking_defaults_and_trims() {
        let now = Utc::now();
        let booking = validate_booking(&request("t", now + Duration::days(1)), now).unwrap();
        assert_eq!(booking.duration_minutes, 60);
        assert_eq!(booking.notes.as_deref(), Some("first session"));

        let mut blank = request("t", now + Duration::days(1));
        blank.notes = Some("   ".into());
        assert_eq!(validate_booking(&blank, now).unwrap().notes, None);
    }

    #[test]
    fn test_validate_booking_rejects_bad_input() {
        let now = Utc::now();
        assert!(matches!(
            validate_booking(&request("t", now), now),
            Err(WorkflowError::PastDate { .. })
        ));

        let mut odd = request("t", now + Duration::hours(2));
        odd.duration_minutes = Some(45);
        assert!(matches!(
            validate_booking(&odd, now),
            Err(WorkflowError::InvalidDuration(45))
        ));

        let mut garbled = request("t", now);
        garbled.requested_date = "tomorrow".into();
        assert!(matches!(
            validate_booking(&garbled, now),
            Err(WorkflowError::InvalidDate { .. })
        ));
    }

    #[tokio::test]
    async fn test_past_booking_never_reaches_storage() {
        let (db, patient, _) = seeded().await;
        db.close().await;

        let now = Utc::now();
        let err = book(&db, &patient, &request("t", now - Duration::minutes(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PastDate { .. }));
    }

    #[tokio::test]
    async fn test_booking_requires_verified_therapist() {
        let (db, patient, _) = seeded().await;
        insert_profile(&db, "pending", Role::Psychologue, false).await;
        let now = Utc::now();

        let err = book(&db, &patient, &request("pending", now + Duration::days(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::TherapistUnavailable));

        let err = book(&db, &patient, &request("p", now + Duration::days(1)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::SelfBooking));
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();

        let appt = book(&db, &patient, &request("t", now + Duration::days(2)), now)
            .await
            .unwrap();
        assert_eq!(appt.status, "pending");

        // Patients cannot confirm
        let err = transition(&db, &patient, &appt.id, &status(AppointmentStatus::Confirmed), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAllowed(_)));

        let confirm = UpdateAppointmentStatusRequest {
            status: AppointmentStatus::Confirmed,
            appointment_date: Some(timestamp(now + Duration::days(3))),
        };
        let (confirmed, previous) = transition(&db, &therapist, &appt.id, &confirm, now)
            .await
            .unwrap();
        assert_eq!(previous, AppointmentStatus::Pending);
        assert_eq!(confirmed.status, "confirmed");
        assert_eq!(confirmed.appointment_date, confirm.appointment_date);

        // Only the therapist cancels a confirmed appointment
        let err = transition(&db, &patient, &appt.id, &status(AppointmentStatus::Cancelled), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotAllowed(_)));

        let (completed, _) =
            transition(&db, &therapist, &appt.id, &status(AppointmentStatus::Completed), now)
                .await
                .unwrap();
        assert_eq!(completed.status, "completed");

        let err = transition(&db, &therapist, &appt.id, &status(AppointmentStatus::Cancelled), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_patient_cancels_pending_and_outsiders_see_nothing() {
        let (db, patient, _) = seeded().await;
        insert_profile(&db, "other", Role::Patient, false).await;
        let now = Utc::now();
        let appt = book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();

        let outsider = Actor::new("other", Role::Patient, false);
        let err = transition(&db, &outsider, &appt.id, &status(AppointmentStatus::Cancelled), now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));

        let (cancelled, _) =
            transition(&db, &patient, &appt.id, &status(AppointmentStatus::Cancelled), now)
                .await
                .unwrap();
        assert_eq!(cancelled.status, "cancelled");
    }

    #[tokio::test]
    async fn test_admin_completes_confirmed_appointment() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();
        let appt = book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();
        transition(&db, &therapist, &appt.id, &status(AppointmentStatus::Confirmed), now)
            .await
            .unwrap();

        let admin = Actor::new("admin", Role::Admin, false);
        let (done, _) = transition(&db, &admin, &appt.id, &status(AppointmentStatus::Completed), now)
            .await
            .unwrap();
        assert_eq!(done.status, "completed");
    }

    #[tokio::test]
    async fn test_confirm_date_must_be_future() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();
        let appt = book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();

        let confirm = UpdateAppointmentStatusRequest {
            status: AppointmentStatus::Confirmed,
            appointment_date: Some(timestamp(now - Duration::hours(1))),
        };
        let err = transition(&db, &therapist, &appt.id, &confirm, now)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::PastDate { .. }));
        assert_eq!(fetch(&db, &appt.id).await.unwrap().status, "pending");
    }

    #[tokio::test]
    async fn test_listing_includes_counterpart() {
        let (db, patient, therapist) = seeded().await;
        let now = Utc::now();
        book(&db, &patient, &request("t", now + Duration::days(1)), now)
            .await
            .unwrap();

        let mine = list_for(&db, &patient).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].counterpart.as_ref().unwrap().id, "t");

        let theirs = list_for(&db, &therapist).await.unwrap();
        assert_eq!(theirs[0].counterpart.as_ref().unwrap().id, "p");
    }
}
