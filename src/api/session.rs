//! Route guard endpoint: tells a client whether it may show a screen.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::Role;
use crate::session::{decide_anonymous, resolve_signed_in, ResolverOptions, RouteDecision};
use crate::AppState;

use super::auth::{extract_token, find_session};
use super::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct RouteQuery {
    pub path: String,
    pub token: Option<String>,
}

pub async fn resolve_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RouteQuery>,
) -> Result<Json<RouteDecision>, ApiError> {
    let token = extract_token(&headers, None).or(query.token);

    let session = match token {
        Some(token) => find_session(&state.db, &token).await?,
        None => None,
    };
    let Some(session) = session else {
        return Ok(Json(decide_anonymous(&query.path)));
    };

    let db = state.db.clone();
    let user_id = session.user_id;
    let lookup = async move {
        let role: Option<String> = sqlx::query_scalar("SELECT role FROM profiles WHERE id = ?")
            .bind(&user_id)
            .fetch_optional(&db)
            .await?;
        Ok::<_, sqlx::Error>(role.and_then(|r| r.parse::<Role>().ok()))
    };

    let options = ResolverOptions::from(&state.config.session);
    Ok(Json(resolve_signed_in(&query.path, lookup, options).await))
}
