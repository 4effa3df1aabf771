use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use rand::Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::access::{Actor, Capability};
use crate::config::Config;
use crate::db::{
    actions, find_profile, now, resource_types, timestamp, LoginRequest, LoginResponse, Profile,
    ProfileResponse, Role, Session, SignupRequest, User,
};
use crate::session::landing_for;
use crate::AppState;

use super::audit::{audit_log, extract_client_ip};
use super::error::ApiError;
use super::validation::validate_signup;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random session token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub(crate) fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Token from `Authorization: Bearer`, `X-API-Key`, or a `token` query
/// parameter (browsers cannot set headers on WebSocket upgrades)
pub fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(api_key) = headers.get("X-API-Key").and_then(|h| h.to_str().ok()) {
        return Some(api_key.to_string());
    }

    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "token" && !value.is_empty()).then(|| value.to_string())
        })
    })
}

/// Find the live session for a token
pub async fn find_session(db: &SqlitePool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ? AND expires_at > ?")
        .bind(hash_token(token))
        .bind(now())
        .fetch_optional(db)
        .await
}

/// The authenticated caller, resolved from the session token
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub session_id: String,
    pub profile: Profile,
    pub actor: Actor,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.actor.id
    }
}

pub async fn resolve_user(db: &SqlitePool, token: &str) -> Result<Option<CurrentUser>, sqlx::Error> {
    let Some(session) = find_session(db, token).await? else {
        return Ok(None);
    };
    let Some(profile) = find_profile(db, &session.user_id).await? else {
        return Ok(None);
    };
    Ok(Some(CurrentUser {
        session_id: session.id,
        actor: Actor::from_profile(&profile),
        profile,
    }))
}

/// Resolve the caller once and stash it for the `CurrentUser` extractor
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers(), request.uri().query())
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = resolve_user(&state.db, &token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }
        let token = extract_token(&parts.headers, parts.uri.query())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        resolve_user(&state.db, &token)
            .await?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))
    }
}

fn client_ip(headers: &HeaderMap, conn: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    extract_client_ip(headers, conn.map(|ConnectInfo(addr)| addr))
}

async fn create_session(db: &SqlitePool, config: &Config, user_id: &str) -> Result<(String, String), ApiError> {
    let token = generate_token();
    let created = chrono::Utc::now();
    let expires_at = created
        .checked_add_signed(chrono::Duration::days(config.auth.session_days))
        .ok_or_else(|| ApiError::internal("Invalid session lifetime"))?;
    let expires_at = timestamp(expires_at);

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(hash_token(&token))
    .bind(&expires_at)
    .bind(timestamp(created))
    .execute(db)
    .await?;

    Ok((token, expires_at))
}

fn login_response(token: String, expires_at: String, profile: Profile) -> LoginResponse {
    let landing = landing_for(Some(profile.role_enum())).to_string();
    LoginResponse {
        token,
        expires_at,
        profile: ProfileResponse::from(profile),
        landing,
    }
}

fn trimmed(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Create an account and its profile, then sign the user in.
///
/// Therapists start unverified.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    conn: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<LoginResponse>), ApiError> {
    validate_signup(&request)?;

    let email = request.email.trim().to_lowercase();
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let role: Role = request
        .role
        .parse()
        .map_err(|_| ApiError::validation_field("role", "Role must be patient or psychologue"))?;
    let is_therapist = role == Role::Psychologue;

    let password_hash = hash_password(&request.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = now();
    let specialties: Vec<String> = if is_therapist {
        request
            .specialties
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        Vec::new()
    };
    let specialties = serde_json::to_string(&specialties)
        .map_err(|e| ApiError::internal(format!("Failed to encode specialties: {}", e)))?;

    let mut tx = state.db.begin().await?;
    sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO profiles (id, email, full_name, role, is_verified, phone, dob, place_of_birth,
            current_address, allergies, bio, rate, specialties, license_number,
            years_of_experience, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&email)
    .bind(request.full_name.trim())
    .bind(role.as_str())
    .bind(trimmed(&request.phone))
    .bind(trimmed(&request.dob))
    .bind(trimmed(&request.place_of_birth))
    .bind(if is_therapist { None } else { trimmed(&request.current_address) })
    .bind(if is_therapist { None } else { trimmed(&request.allergies) })
    .bind(if is_therapist { trimmed(&request.bio) } else { None })
    .bind(if is_therapist { request.rate } else { None })
    .bind(&specialties)
    .bind(if is_therapist { trimmed(&request.license_number) } else { None })
    .bind(if is_therapist { Some(request.years_of_experience.unwrap_or(0)) } else { None })
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(user_id = %id, role = %role, "Account created");

    let ip = client_ip(&headers, conn.as_ref());
    audit_log(
        &state,
        actions::AUTH_SIGNUP,
        resource_types::USER,
        Some(&id),
        Some(&id),
        ip.as_deref(),
        Some(serde_json::json!({ "role": role.as_str() })),
    )
    .await;

    let (token, expires_at) = create_session(&state.db, &state.config, &id).await?;
    let profile = find_profile(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::internal("Profile missing after signup"))?;

    Ok((StatusCode::CREATED, Json(login_response(token, expires_at, profile))))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    conn: Option<ConnectInfo<SocketAddr>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let email = request.email.trim().to_lowercase();
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    if !verify_password(&request.password, &user.password_hash) {
        tracing::debug!(email = %email, "Rejected login with wrong password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let profile = find_profile(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account has no profile"))?;

    let (token, expires_at) = create_session(&state.db, &state.config, &user.id).await?;

    let ip = client_ip(&headers, conn.as_ref());
    audit_log(
        &state,
        actions::AUTH_LOGIN,
        resource_types::USER,
        Some(&user.id),
        Some(&user.id),
        ip.as_deref(),
        None,
    )
    .await;

    Ok(Json(login_response(token, expires_at, profile)))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Result<StatusCode, ApiError> {
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(&user.session_id)
        .execute(&state.db)
        .await?;

    audit_log(
        &state,
        actions::AUTH_LOGOUT,
        resource_types::USER,
        Some(user.id()),
        Some(user.id()),
        None,
        None,
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub profile: ProfileResponse,
    pub capabilities: Vec<Capability>,
    /// Therapist account still pending verification
    pub restricted: bool,
    pub landing: &'static str,
}

pub async fn me(user: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        capabilities: user.actor.capabilities().to_vec(),
        restricted: user.actor.is_restricted(),
        landing: landing_for(Some(user.actor.role)),
        profile: ProfileResponse::from(user.profile),
    })
}

/// Create the configured admin account if it does not exist yet
pub async fn ensure_admin_user(db: &SqlitePool, config: &Config) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password)
    else {
        return Ok(());
    };
    let email = email.trim().to_lowercase();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password_hash = hash_password(password)
        .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
    let id = uuid::Uuid::new_v4().to_string();
    let now = now();

    let mut tx = db.begin().await?;
    sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        r#"
        INSERT INTO profiles (id, email, full_name, role, is_verified, created_at, updated_at)
        VALUES (?, ?, 'Administrator', 'admin', 1, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&email)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(email = %email, "Created admin account from configuration");
    Ok(())
}
