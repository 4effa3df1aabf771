//! Input validation for API requests.
//!
//! Each validator returns `Err(message)` for the offending field; handlers
//! collect them with `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};
use crate::db::{CreateRatingRequest, SignupRequest, UpdateProfileRequest};

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();

    /// Digits only, 8 to 15 of them
    static ref PHONE_REGEX: Regex = Regex::new(r"^[0-9]{8,15}$").unwrap();
}

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const MAX_POST_LENGTH: usize = 5000;
pub const MAX_COMMENT_LENGTH: usize = 2000;
pub const MAX_MESSAGE_LENGTH: usize = 4000;

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<(), String> {
    if !PHONE_REGEX.is_match(phone) {
        return Err("Phone must contain 8 to 15 digits".to_string());
    }
    Ok(())
}

pub fn validate_required(value: Option<&str>, label: &str) -> Result<(), String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(format!("{} is required", label)),
    }
}

pub fn validate_rate(rate: Option<f64>) -> Result<(), String> {
    match rate {
        Some(r) if r.is_finite() && r > 0.0 => Ok(()),
        _ => Err("Rate must be a positive number".to_string()),
    }
}

pub fn validate_text(value: &str, label: &str, max: usize) -> Result<(), String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(format!("{} cannot be empty", label));
    }
    if trimmed.chars().count() > max {
        return Err(format!("{} is too long (max {} characters)", label, max));
    }
    Ok(())
}

pub fn validate_rating_value(rating: i64) -> Result<(), String> {
    if !(1..=5).contains(&rating) {
        return Err("Rating must be between 1 and 5".to_string());
    }
    Ok(())
}

/// Validate a signup payload for either role
pub fn validate_signup(request: &SignupRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();

    errors.check("email", validate_email(request.email.trim()));
    errors.check("password", validate_password(&request.password));
    errors.check("full_name", validate_required(Some(&request.full_name), "Full name"));
    errors.check("dob", validate_required(request.dob.as_deref(), "Date of birth"));
    match request.phone.as_deref() {
        Some(phone) => errors.check("phone", validate_phone(phone.trim())),
        None => errors.add("phone", "Phone is required"),
    };

    match request.role.as_str() {
        "patient" => {}
        "psychologue" => {
            errors.check("bio", validate_required(request.bio.as_deref(), "Bio"));
            errors.check("rate", validate_rate(request.rate));
            if request.specialties.iter().all(|s| s.trim().is_empty()) {
                errors.add("specialties", "Select at least one specialty");
            }
            errors.check(
                "license_number",
                validate_required(request.license_number.as_deref(), "License number"),
            );
            if request.years_of_experience.is_some_and(|y| y < 0) {
                errors.add("years_of_experience", "Years of experience cannot be negative");
            }
        }
        _ => {
            errors.add("role", "Role must be patient or psychologue");
        }
    }

    errors.finish()
}

/// Validate the fields present in a profile edit
pub fn validate_profile_update(request: &UpdateProfileRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.full_name {
        errors.check("full_name", validate_required(Some(name), "Full name"));
    }
    if let Some(phone) = &request.phone {
        errors.check("phone", validate_phone(phone.trim()));
    }
    if request.rate.is_some() {
        errors.check("rate", validate_rate(request.rate));
    }
    errors.finish()
}

pub fn validate_rating(request: &CreateRatingRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("rating", validate_rating_value(request.rating));
    if let Some(comment) = &request.comment {
        if comment.chars().count() > MAX_COMMENT_LENGTH {
            errors.add("comment", "Comment is too long");
        }
    }
    errors.finish()
}
