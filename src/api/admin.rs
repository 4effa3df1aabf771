//! Admin dashboard: therapist verification and platform counters.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::access::Capability;
use crate::db::{
    actions, find_profile, load_admin_stats, now, resource_types, AdminStats, Profile,
    ProfileResponse, Role,
};
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SetVerificationRequest {
    pub is_verified: bool,
}

/// Every therapist account, newest first, with its certificate link
pub async fn list_therapists(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<ProfileResponse>>, ApiError> {
    user.actor.require(Capability::VerifyTherapists)?;

    let therapists: Vec<Profile> = sqlx::query_as(
        "SELECT * FROM profiles WHERE role = 'psychologue' ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(therapists.into_iter().map(ProfileResponse::from).collect()))
}

pub async fn set_verification(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<SetVerificationRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.actor.require(Capability::VerifyTherapists)?;

    let profile = find_profile(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;
    if profile.role_enum() != Role::Psychologue {
        return Err(ApiError::bad_request("Only therapist accounts can be verified"));
    }

    sqlx::query("UPDATE profiles SET is_verified = ?, updated_at = ? WHERE id = ?")
        .bind(request.is_verified)
        .bind(now())
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        therapist_id = %id,
        admin_id = %user.id(),
        is_verified = request.is_verified,
        "Therapist verification changed"
    );

    let action = if request.is_verified {
        actions::THERAPIST_VERIFY
    } else {
        actions::THERAPIST_UNVERIFY
    };
    let ip = extract_client_ip(&headers, None);
    audit_log(
        &state,
        action,
        resource_types::PROFILE,
        Some(&id),
        Some(user.id()),
        ip.as_deref(),
        Some(serde_json::json!({ "full_name": profile.full_name })),
    )
    .await;

    let updated = find_profile(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;
    Ok(Json(ProfileResponse::from(updated)))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<AdminStats>, ApiError> {
    user.actor.require(Capability::VerifyTherapists)?;
    Ok(Json(load_admin_stats(&state.db).await?))
}
