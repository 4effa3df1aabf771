use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::access::Capability;
use crate::db::{
    actions, find_profile, now, resource_types, CreateRatingRequest, Rating, RatingListResponse,
    RatingWithPatient, Role,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::CurrentUser;
use super::error::ApiError;
use super::validation::validate_rating;

pub async fn list_ratings(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(therapist_id): Path<String>,
) -> Result<Json<RatingListResponse>, ApiError> {
    user.actor.require(Capability::ViewProfiles)?;

    let ratings: Vec<RatingWithPatient> = sqlx::query_as(
        r#"
        SELECT r.*, p.full_name AS patient_name, p.avatar_url AS patient_avatar
        FROM ratings r
        LEFT JOIN profiles p ON p.id = r.patient_id
        WHERE r.therapist_id = ?
        ORDER BY r.created_at DESC
        "#,
    )
    .bind(&therapist_id)
    .fetch_all(&state.db)
    .await?;

    let total_ratings = ratings.len() as i64;
    let average_rating = if ratings.is_empty() {
        0.0
    } else {
        ratings.iter().map(|r| r.rating.rating as f64).sum::<f64>() / total_ratings as f64
    };

    Ok(Json(RatingListResponse {
        therapist_id,
        average_rating,
        total_ratings,
        ratings,
    }))
}

/// Rate a therapist, or update the caller's earlier rating for the same
/// appointment. An appointment, when given, must be one of the caller's
/// completed sessions with this therapist.
pub async fn submit_rating(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(therapist_id): Path<String>,
    Json(request): Json<CreateRatingRequest>,
) -> Result<(StatusCode, Json<Rating>), ApiError> {
    user.actor.require(Capability::RateTherapist)?;
    validate_rating(&request)?;

    let therapist = find_profile(&state.db, &therapist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;
    if therapist.role_enum() != Role::Psychologue {
        return Err(ApiError::not_found("Therapist not found"));
    }

    let appointment_id = request
        .appointment_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or_default()
        .to_string();
    if !appointment_id.is_empty() {
        let completed: i64 = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM appointments
                WHERE id = ? AND patient_id = ? AND therapist_id = ? AND status = 'completed'
            )
            "#,
        )
        .bind(&appointment_id)
        .bind(user.id())
        .bind(&therapist_id)
        .fetch_one(&state.db)
        .await?;
        if completed == 0 {
            return Err(ApiError::validation_field(
                "appointment_id",
                "Only completed appointments with this therapist can be rated",
            ));
        }
    }

    let comment = request
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let now = now();

    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM ratings WHERE therapist_id = ? AND patient_id = ? AND appointment_id = ?",
    )
    .bind(&therapist_id)
    .bind(user.id())
    .bind(&appointment_id)
    .fetch_optional(&state.db)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO ratings (id, therapist_id, patient_id, appointment_id, rating, comment, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (therapist_id, patient_id, appointment_id)
        DO UPDATE SET rating = excluded.rating, comment = excluded.comment, updated_at = excluded.updated_at
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&therapist_id)
    .bind(user.id())
    .bind(&appointment_id)
    .bind(request.rating)
    .bind(comment)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let rating: Rating = sqlx::query_as(
        "SELECT * FROM ratings WHERE therapist_id = ? AND patient_id = ? AND appointment_id = ?",
    )
    .bind(&therapist_id)
    .bind(user.id())
    .bind(&appointment_id)
    .fetch_one(&state.db)
    .await?;

    audit_log(
        &state,
        actions::RATING_SUBMIT,
        resource_types::RATING,
        Some(&rating.id),
        Some(user.id()),
        None,
        Some(serde_json::json!({ "therapist_id": therapist_id, "rating": rating.rating })),
    )
    .await;

    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(rating)))
}
