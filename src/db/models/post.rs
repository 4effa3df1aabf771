//! Feed models: posts, comments, likes.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::profile::ProfileSummary;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Post row joined with author and counters for the caller
#[derive(Debug, Clone, FromRow)]
pub struct FeedPostRow {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub author_role: String,
    pub author_verified: bool,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedPost {
    pub id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub author: ProfileSummary,
    pub like_count: i64,
    pub comment_count: i64,
    pub liked_by_me: bool,
}

impl From<FeedPostRow> for FeedPost {
    fn from(row: FeedPostRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            image_url: row.image_url,
            created_at: row.created_at,
            updated_at: row.updated_at,
            author: ProfileSummary {
                id: row.user_id,
                full_name: row.author_name,
                avatar_url: row.author_avatar,
                role: row.author_role,
                is_verified: row.author_verified,
            },
            like_count: row.like_count,
            comment_count: row.comment_count,
            liked_by_me: row.liked_by_me,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CommentWithAuthor {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub author_name: String,
    pub author_avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub content: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatePostRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: i64,
}
