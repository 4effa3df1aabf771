//! Account and session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::profile::ProfileResponse;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub profile: ProfileResponse,
    /// Route the client should land on for this role
    pub landing: String,
}

/// Self-service signup for patients and therapists.
///
/// Therapist-only fields are ignored for patients and the reverse.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    /// "patient" or "psychologue"
    pub role: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub dob: Option<String>,
    pub place_of_birth: Option<String>,
    // Patient
    pub current_address: Option<String>,
    pub allergies: Option<String>,
    // Therapist
    pub bio: Option<String>,
    pub rate: Option<f64>,
    #[serde(default)]
    pub specialties: Vec<String>,
    pub license_number: Option<String>,
    pub years_of_experience: Option<i64>,
}
