//! Multipart upload handling shared by avatar, certificate and post images.

use axum::{
    extract::{Multipart, State},
    Json,
};
use bytes::Bytes;
use std::sync::Arc;

use crate::access::Capability;
use crate::storage::{avatar_path, check_content_type, file_extension, Bucket, StoredObject};
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

pub struct UploadedFile {
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// Read the `file` field (or the first file-bearing field) of a multipart body
pub async fn read_file_field(mut multipart: Multipart) -> Result<UploadedFile, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let is_file = field.name() == Some("file") || field.file_name().is_some();
        if !is_file {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
        return Ok(UploadedFile { file_name, data });
    }
    Err(ApiError::validation_field("file", "A file is required"))
}

/// Store an upload under a fresh, never-reused object path
pub async fn store_upload(
    state: &AppState,
    bucket: Bucket,
    file: &UploadedFile,
    object_path: impl FnOnce(i64, &str) -> String,
) -> Result<StoredObject, ApiError> {
    let extension = file_extension(bucket, file.file_name.as_deref());
    check_content_type(bucket, &extension)?;
    let path = object_path(chrono::Utc::now().timestamp_millis(), &extension);
    Ok(state.storage.put(bucket, &path, &file.data).await?)
}

/// Upload an image to attach to a post
pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    multipart: Multipart,
) -> Result<Json<StoredObject>, ApiError> {
    user.actor.require(Capability::CreatePost)?;
    let file = read_file_field(multipart).await?;
    let user_id = user.id().to_string();
    let stored = store_upload(&state, Bucket::Avatars, &file, |millis, ext| {
        avatar_path(&user_id, millis, ext)
    })
    .await?;
    Ok(Json(stored))
}
