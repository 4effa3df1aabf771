use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::db::{
    actions, find_profile_summary, resource_types, AppointmentResponse, AppointmentStatus,
    CreateAppointmentRequest, UpdateAppointmentStatusRequest,
};
use crate::workflow::appointments::{book, list_for, transition};
use crate::AppState;

use super::audit::audit_log;
use super::auth::CurrentUser;
use super::error::ApiError;

pub async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<AppointmentResponse>>, ApiError> {
    Ok(Json(list_for(&state.db, &user.actor).await?))
}

pub async fn create_appointment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<AppointmentResponse>), ApiError> {
    let appointment = book(&state.db, &user.actor, &request, chrono::Utc::now()).await?;

    audit_log(
        &state,
        actions::APPOINTMENT_CREATE,
        resource_types::APPOINTMENT,
        Some(&appointment.id),
        Some(user.id()),
        None,
        Some(serde_json::json!({ "therapist_id": appointment.therapist_id })),
    )
    .await;

    let counterpart = find_profile_summary(&state.db, &appointment.therapist_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(AppointmentResponse::new(appointment, counterpart)),
    ))
}

/// Confirm, cancel or complete an appointment
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateAppointmentStatusRequest>,
) -> Result<Json<AppointmentResponse>, ApiError> {
    let (appointment, previous) =
        transition(&state.db, &user.actor, &id, &request, chrono::Utc::now()).await?;

    let action = match request.status {
        AppointmentStatus::Confirmed => Some(actions::APPOINTMENT_CONFIRM),
        AppointmentStatus::Cancelled => Some(actions::APPOINTMENT_CANCEL),
        AppointmentStatus::Completed => Some(actions::APPOINTMENT_COMPLETE),
        AppointmentStatus::Pending => None,
    };
    if let Some(action) = action {
        audit_log(
            &state,
            action,
            resource_types::APPOINTMENT,
            Some(&appointment.id),
            Some(user.id()),
            None,
            Some(serde_json::json!({
                "from": previous.as_str(),
                "to": request.status.as_str(),
            })),
        )
        .await;
    }

    let counterpart_id = if user.id() == appointment.patient_id {
        appointment.therapist_id.clone()
    } else {
        appointment.patient_id.clone()
    };
    let counterpart = find_profile_summary(&state.db, &counterpart_id).await?;
    Ok(Json(AppointmentResponse::new(appointment, counterpart)))
}
