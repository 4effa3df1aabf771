//! Therapist directory search.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::access::Capability;
use crate::db::parse_specialties;
use crate::AppState;

use super::auth::CurrentUser;
use super::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Highest rate first
    #[default]
    Rate,
    /// Most years of experience first
    Experience,
    /// Alphabetical by name
    Name,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    /// Comma-separated; a therapist must have every listed specialty
    pub specialties: Option<String>,
    #[serde(default)]
    pub sort: SortBy,
}

#[derive(Debug, FromRow)]
struct TherapistRow {
    id: String,
    full_name: String,
    avatar_url: Option<String>,
    bio: Option<String>,
    rate: Option<f64>,
    specialties: String,
    years_of_experience: Option<i64>,
    average_rating: Option<f64>,
    rating_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TherapistCard {
    pub id: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub rate: Option<f64>,
    pub specialties: Vec<String>,
    pub years_of_experience: Option<i64>,
    pub average_rating: Option<f64>,
    pub rating_count: i64,
}

impl From<TherapistRow> for TherapistCard {
    fn from(row: TherapistRow) -> Self {
        Self {
            specialties: parse_specialties(&row.specialties),
            id: row.id,
            full_name: row.full_name,
            avatar_url: row.avatar_url,
            bio: row.bio,
            rate: row.rate,
            years_of_experience: row.years_of_experience,
            average_rating: row.average_rating,
            rating_count: row.rating_count,
        }
    }
}

fn matches_text(card: &TherapistCard, needle: &str) -> bool {
    card.full_name.to_lowercase().contains(needle)
        || card
            .bio
            .as_deref()
            .is_some_and(|bio| bio.to_lowercase().contains(needle))
        || card
            .specialties
            .iter()
            .any(|s| s.to_lowercase().contains(needle))
}

fn has_all_specialties(card: &TherapistCard, wanted: &[String]) -> bool {
    wanted.iter().all(|w| {
        card.specialties
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(w))
    })
}

/// Filter and order verified therapists
pub fn filter_and_sort(cards: Vec<TherapistCard>, query: &SearchQuery) -> Vec<TherapistCard> {
    let needle = query
        .q
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());
    let wanted: Vec<String> = query
        .specialties
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let mut results: Vec<TherapistCard> = cards
        .into_iter()
        .filter(|card| needle.as_deref().map_or(true, |n| matches_text(card, n)))
        .filter(|card| has_all_specialties(card, &wanted))
        .collect();

    match query.sort {
        SortBy::Rate => results.sort_by(|a, b| {
            b.rate
                .unwrap_or(0.0)
                .partial_cmp(&a.rate.unwrap_or(0.0))
                .unwrap_or(Ordering::Equal)
        }),
        SortBy::Experience => results.sort_by(|a, b| {
            b.years_of_experience
                .unwrap_or(0)
                .cmp(&a.years_of_experience.unwrap_or(0))
        }),
        SortBy::Name => results.sort_by_key(|c| c.full_name.to_lowercase()),
    }
    results
}

pub async fn search_therapists(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<TherapistCard>>, ApiError> {
    user.actor.require(Capability::SearchTherapists)?;

    let rows: Vec<TherapistRow> = sqlx::query_as(
        r#"
        SELECT p.id, p.full_name, p.avatar_url, p.bio, p.rate, p.specialties,
            p.years_of_experience,
            (SELECT AVG(r.rating) FROM ratings r WHERE r.therapist_id = p.id) AS average_rating,
            (SELECT COUNT(*) FROM ratings r WHERE r.therapist_id = p.id) AS rating_count
        FROM profiles p
        WHERE p.role = 'psychologue' AND p.is_verified = 1
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    let cards = rows.into_iter().map(TherapistCard::from).collect();
    Ok(Json(filter_and_sort(cards, &query)))
}
