//! Profile and role models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Account role, fixed at signup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Patient,
    /// Therapist; needs admin verification before most actions
    Psychologue,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Psychologue => "psychologue",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "patient" => Ok(Role::Patient),
            "psychologue" => Ok(Role::Psychologue),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(Role::Patient)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub is_verified: bool,
    pub phone: Option<String>,
    pub dob: Option<String>,
    pub place_of_birth: Option<String>,
    pub current_address: Option<String>,
    pub allergies: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub rate: Option<f64>,
    /// JSON array of specialty names
    pub specialties: String,
    pub license_number: Option<String>,
    pub years_of_experience: Option<i64>,
    pub certificate_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Profile {
    pub fn role_enum(&self) -> Role {
        Role::from(self.role.clone())
    }

    pub fn specialties_list(&self) -> Vec<String> {
        parse_specialties(&self.specialties)
    }
}

/// Decode the stored specialties column, tolerating malformed rows
pub fn parse_specialties(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub is_verified: bool,
    pub phone: Option<String>,
    pub dob: Option<String>,
    pub place_of_birth: Option<String>,
    pub current_address: Option<String>,
    pub allergies: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub rate: Option<f64>,
    pub specialties: Vec<String>,
    pub license_number: Option<String>,
    pub years_of_experience: Option<i64>,
    pub certificate_url: Option<String>,
    pub created_at: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        let role = profile.role_enum();
        let specialties = profile.specialties_list();
        Self {
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            role,
            is_verified: profile.is_verified,
            phone: profile.phone,
            dob: profile.dob,
            place_of_birth: profile.place_of_birth,
            current_address: profile.current_address,
            allergies: profile.allergies,
            avatar_url: profile.avatar_url,
            bio: profile.bio,
            rate: profile.rate,
            specialties,
            license_number: profile.license_number,
            years_of_experience: profile.years_of_experience,
            certificate_url: profile.certificate_url,
            created_at: profile.created_at,
        }
    }
}

/// Compact author/counterpart view embedded in feed and chat payloads
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfileSummary {
    pub id: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub role: String,
    pub is_verified: bool,
}

/// Self-service profile edit. Which fields apply depends on the caller's role.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    // Patient
    pub allergies: Option<String>,
    pub current_address: Option<String>,
    // Therapist
    pub bio: Option<String>,
    pub rate: Option<f64>,
}

pub async fn find_profile(db: &SqlitePool, id: &str) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_profile_summary(
    db: &SqlitePool,
    id: &str,
) -> Result<Option<ProfileSummary>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, full_name, avatar_url, role, is_verified FROM profiles WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(db)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("Psychologue".parse::<Role>().unwrap(), Role::Psychologue);
        assert_eq!(Role::from("admin".to_string()), Role::Admin);
        assert_eq!(Role::from("unknown".to_string()), Role::Patient);
        assert!("therapist".parse::<Role>().is_err());
        assert_eq!(Role::Psychologue.to_string(), "psychologue");
    }

    #[test]
    fn test_parse_specialties() {
        assert_eq!(
            parse_specialties(r#"["Anxiety","Couples"]"#),
            vec!["Anxiety".to_string(), "Couples".to_string()]
        );
        assert!(parse_specialties("not json").is_empty());
    }
}
