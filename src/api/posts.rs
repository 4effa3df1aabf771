//! Community feed: posts, likes and comments.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::access::Capability;
use crate::db::{
    actions, now, resource_types, CommentWithAuthor, CreateCommentRequest, CreatePostRequest,
    FeedPost, FeedPostRow, LikeResponse, Post, UpdatePostRequest,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::CurrentUser;
use super::error::ApiError;
use super::validation::{validate_text, MAX_COMMENT_LENGTH, MAX_POST_LENGTH};

pub const FEED_PAGE_SIZE: i64 = 20;

const FEED_SELECT: &str = r#"
    SELECT p.*, a.full_name AS author_name, a.avatar_url AS author_avatar,
        a.role AS author_role, a.is_verified AS author_verified,
        (SELECT COUNT(*) FROM likes l WHERE l.post_id = p.id) AS like_count,
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
        EXISTS (SELECT 1 FROM likes l WHERE l.post_id = p.id AND l.user_id = ?1) AS liked_by_me
    FROM posts p
    JOIN profiles a ON a.id = p.user_id
"#;

async fn feed_post(db: &SqlitePool, viewer_id: &str, post_id: &str) -> Result<FeedPost, ApiError> {
    let sql = format!("{} WHERE p.id = ?2", FEED_SELECT);
    let row: FeedPostRow = sqlx::query_as(&sql)
        .bind(viewer_id)
        .bind(post_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))?;
    Ok(row.into())
}

async fn find_post(db: &SqlitePool, post_id: &str) -> Result<Post, ApiError> {
    sqlx::query_as("SELECT * FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Post not found"))
}

async fn like_count(db: &SqlitePool, post_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE post_id = ?")
        .bind(post_id)
        .fetch_one(db)
        .await
}

/// The newest posts across the community
pub async fn list_feed(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<Json<Vec<FeedPost>>, ApiError> {
    user.actor.require(Capability::BrowseFeed)?;

    let sql = format!("{} ORDER BY p.created_at DESC LIMIT ?2", FEED_SELECT);
    let rows: Vec<FeedPostRow> = sqlx::query_as(&sql)
        .bind(user.id())
        .bind(FEED_PAGE_SIZE)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows.into_iter().map(FeedPost::from).collect()))
}

pub async fn list_user_posts(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(author_id): Path<String>,
) -> Result<Json<Vec<FeedPost>>, ApiError> {
    user.actor.require(Capability::ViewProfiles)?;

    let sql = format!("{} WHERE p.user_id = ?2 ORDER BY p.created_at DESC", FEED_SELECT);
    let rows: Vec<FeedPostRow> = sqlx::query_as(&sql)
        .bind(user.id())
        .bind(&author_id)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows.into_iter().map(FeedPost::from).collect()))
}

/// A post needs text, an image, or both
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(request): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<FeedPost>), ApiError> {
    user.actor.require(Capability::CreatePost)?;

    let content = request.content.trim();
    let image_url = request
        .image_url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty());
    if content.is_empty() && image_url.is_none() {
        return Err(ApiError::validation_field(
            "content",
            "A post needs text or an image",
        ));
    }
    if content.chars().count() > MAX_POST_LENGTH {
        return Err(ApiError::validation_field(
            "content",
            format!("Post is too long (max {} characters)", MAX_POST_LENGTH),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = now();
    sqlx::query(
        "INSERT INTO posts (id, user_id, content, image_url, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(user.id())
    .bind(content)
    .bind(image_url)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::debug!(post_id = %id, user_id = %user.id(), "Post created");
    Ok((StatusCode::CREATED, Json(feed_post(&state.db, user.id(), &id).await?)))
}

pub async fn update_post(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> Result<Json<FeedPost>, ApiError> {
    user.actor.require(Capability::CreatePost)?;

    let post = find_post(&state.db, &id).await?;
    if post.user_id != user.id() {
        return Err(ApiError::forbidden("Only the author can edit this post"));
    }
    let content = request.content.trim();
    validate_text(content, "Post", MAX_POST_LENGTH)
        .map_err(|e| ApiError::validation_field("content", e))?;

    sqlx::query("UPDATE posts SET content = ?, updated_at = ? WHERE id = ?")
        .bind(content)
        .bind(now())
        .bind(&id)
        .execute(&state.db)
        .await?;

    Ok(Json(feed_post(&state.db, user.id(), &id).await?))
}

/// Authors remove their own posts; admins moderate anyone's
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let post = find_post(&state.db, &id).await?;
    let is_owner = post.user_id == user.id();
    if !is_owner {
        user.actor.require(Capability::ModerateContent)?;
    }

    sqlx::query("DELETE FROM posts WHERE id = ?")
        .bind(&id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::POST_DELETE,
        resource_types::POST,
        Some(&id),
        Some(user.id()),
        None,
        Some(serde_json::json!({ "author_id": post.user_id, "moderated": !is_owner })),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn like_post(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<LikeResponse>, ApiError> {
    user.actor.require(Capability::Like)?;
    find_post(&state.db, &id).await?;

    sqlx::query("INSERT OR IGNORE INTO likes (post_id, user_id, created_at) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(user.id())
        .bind(now())
        .execute(&state.db)
        .await?;

    Ok(Json(LikeResponse {
        liked: true,
        like_count: like_count(&state.db, &id).await?,
    }))
}

pub async fn unlike_post(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<LikeResponse>, ApiError> {
    user.actor.require(Capability::Like)?;
    find_post(&state.db, &id).await?;

    sqlx::query("DELETE FROM likes WHERE post_id = ? AND user_id = ?")
        .bind(&id)
        .bind(user.id())
        .execute(&state.db)
        .await?;

    Ok(Json(LikeResponse {
        liked: false,
        like_count: like_count(&state.db, &id).await?,
    }))
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<CommentWithAuthor>>, ApiError> {
    user.actor.require(Capability::BrowseFeed)?;
    find_post(&state.db, &id).await?;

    let comments: Vec<CommentWithAuthor> = sqlx::query_as(
        r#"
        SELECT c.*, a.full_name AS author_name, a.avatar_url AS author_avatar
        FROM comments c
        JOIN profiles a ON a.id = c.user_id
        WHERE c.post_id = ?
        ORDER BY c.created_at ASC, c.rowid ASC
        "#,
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(comments))
}

pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentWithAuthor>), ApiError> {
    user.actor.require(Capability::Comment)?;
    find_post(&state.db, &id).await?;

    let content = request.content.trim();
    validate_text(content, "Comment", MAX_COMMENT_LENGTH)
        .map_err(|e| ApiError::validation_field("content", e))?;

    let comment_id = uuid::Uuid::new_v4().to_string();
    let now = now();
    sqlx::query(
        "INSERT INTO comments (id, post_id, user_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&comment_id)
    .bind(&id)
    .bind(user.id())
    .bind(content)
    .bind(&now)
    .execute(&state.db)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CommentWithAuthor {
            id: comment_id,
            post_id: id,
            user_id: user.id().to_string(),
            content: content.to_string(),
            created_at: now,
            author_name: user.profile.full_name.clone(),
            author_avatar: user.profile.avatar_url.clone(),
        }),
    ))
}
