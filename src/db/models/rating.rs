//! Therapist rating models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Rating {
    pub id: String,
    pub therapist_id: String,
    pub patient_id: String,
    /// Empty when the rating is not tied to an appointment
    #[serde(skip_serializing_if = "String::is_empty")]
    pub appointment_id: String,
    pub rating: i64,
    pub comment: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Rating joined with the patient who left it
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct RatingWithPatient {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub rating: Rating,
    pub patient_name: Option<String>,
    pub patient_avatar: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRatingRequest {
    pub rating: i64,
    pub comment: Option<String>,
    pub appointment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatingListResponse {
    pub therapist_id: String,
    /// 0 when there are no ratings yet
    pub average_rating: f64,
    pub total_ratings: i64,
    pub ratings: Vec<RatingWithPatient>,
}
