use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use std::sync::Arc;

use crate::access::Capability;
use crate::db::{
    actions, find_profile, now, resource_types, ProfileResponse, Role, UpdateProfileRequest,
};
use crate::storage::{avatar_path, certificate_path, Bucket};
use crate::AppState;

use super::audit::audit_log;
use super::auth::CurrentUser;
use super::error::ApiError;
use super::uploads::{read_file_field, store_upload};
use super::validation::validate_profile_update;

/// Clear personal fields that only the owner, an admin, or someone sharing
/// an appointment with the owner may read
fn redact(mut profile: ProfileResponse) -> ProfileResponse {
    profile.email = String::new();
    profile.phone = None;
    profile.dob = None;
    profile.place_of_birth = None;
    profile.current_address = None;
    profile.allergies = None;
    profile.license_number = None;
    profile
}

async fn shares_appointment(state: &AppState, a: &str, b: &str) -> Result<bool, sqlx::Error> {
    let exists: i64 = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM appointments
            WHERE (patient_id = ?1 AND therapist_id = ?2) OR (patient_id = ?2 AND therapist_id = ?1)
        )
        "#,
    )
    .bind(a)
    .bind(b)
    .fetch_one(&state.db)
    .await?;
    Ok(exists != 0)
}

pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.actor.require(Capability::ViewProfiles)?;

    let profile = find_profile(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    let response = ProfileResponse::from(profile);

    let full_view = id == user.id()
        || user.actor.is_admin()
        || shares_appointment(&state, user.id(), &id).await?;
    Ok(Json(if full_view { response } else { redact(response) }))
}

/// Edit the caller's own profile. Patients edit contact and medical fields,
/// therapists their practice fields; anything else in the body is ignored.
pub async fn update_my_profile(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.actor.require(Capability::EditProfile)?;
    validate_profile_update(&request)?;

    let role = user.actor.role;
    let patient_field = |v: &Option<String>| {
        if role == Role::Patient {
            v.as_deref().map(str::trim).map(str::to_string)
        } else {
            None
        }
    };
    let therapist_bio = if role == Role::Psychologue {
        request.bio.as_deref().map(str::trim).map(str::to_string)
    } else {
        None
    };
    let therapist_rate = if role == Role::Psychologue { request.rate } else { None };

    sqlx::query(
        r#"
        UPDATE profiles SET
            full_name = COALESCE(?, full_name),
            phone = COALESCE(?, phone),
            allergies = COALESCE(?, allergies),
            current_address = COALESCE(?, current_address),
            bio = COALESCE(?, bio),
            rate = COALESCE(?, rate),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.full_name.as_deref().map(str::trim))
    .bind(request.phone.as_deref().map(str::trim))
    .bind(patient_field(&request.allergies))
    .bind(patient_field(&request.current_address))
    .bind(therapist_bio)
    .bind(therapist_rate)
    .bind(now())
    .bind(user.id())
    .execute(&state.db)
    .await?;

    audit_log(
        &state,
        actions::PROFILE_UPDATE,
        resource_types::PROFILE,
        Some(user.id()),
        Some(user.id()),
        None,
        None,
    )
    .await;

    let profile = find_profile(&state.db, user.id())
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    Ok(Json(ProfileResponse::from(profile)))
}

pub async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.actor.require(Capability::EditProfile)?;
    let file = read_file_field(multipart).await?;
    let user_id = user.id().to_string();
    let stored = store_upload(&state, Bucket::Avatars, &file, |millis, ext| {
        avatar_path(&user_id, millis, ext)
    })
    .await?;

    sqlx::query("UPDATE profiles SET avatar_url = ?, updated_at = ? WHERE id = ?")
        .bind(&stored.public_url)
        .bind(now())
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::PROFILE_AVATAR,
        resource_types::PROFILE,
        Some(&user_id),
        Some(&user_id),
        None,
        Some(serde_json::json!({ "path": stored.path })),
    )
    .await;

    let profile = find_profile(&state.db, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    Ok(Json(ProfileResponse::from(profile)))
}

/// Therapists upload their license certificate, verified or not
pub async fn upload_certificate(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<ProfileResponse>, ApiError> {
    user.actor.require(Capability::UploadCertificate)?;
    let file = read_file_field(multipart).await?;
    let user_id = user.id().to_string();
    let stored = store_upload(&state, Bucket::Certificates, &file, |millis, ext| {
        certificate_path(&user_id, millis, ext)
    })
    .await?;

    sqlx::query("UPDATE profiles SET certificate_url = ?, updated_at = ? WHERE id = ?")
        .bind(&stored.public_url)
        .bind(now())
        .bind(&user_id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user_id, path = %stored.path, "Certificate uploaded");
    audit_log(
        &state,
        actions::PROFILE_CERTIFICATE,
        resource_types::PROFILE,
        Some(&user_id),
        Some(&user_id),
        None,
        None,
    )
    .await;

    let profile = find_profile(&state.db, &user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;
    Ok(Json(ProfileResponse::from(profile)))
}
