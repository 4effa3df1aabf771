//! Appointment models and the status graph.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::profile::ProfileSummary;

/// Appointment lifecycle.
///
/// `pending -> {confirmed, cancelled}`, `confirmed -> {completed, cancelled}`.
/// `completed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }

    /// Whether the graph has an edge from `self` to `next`, regardless of who asks
    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Completed) | (Confirmed, Cancelled)
        )
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AppointmentStatus::Pending),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "completed" => Ok(AppointmentStatus::Completed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            _ => Err(format!("Unknown appointment status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: String,
    pub patient_id: String,
    pub therapist_id: String,
    pub status: String,
    pub requested_date: Option<String>,
    pub appointment_date: Option<String>,
    pub duration_minutes: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Appointment {
    pub fn status_enum(&self) -> Result<AppointmentStatus, String> {
        self.status.parse()
    }

    /// Requested date with fallbacks for rows written before it existed
    pub fn effective_requested_date(&self) -> &str {
        self.requested_date
            .as_deref()
            .or(self.appointment_date.as_deref())
            .unwrap_or(&self.created_at)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAppointmentRequest {
    pub therapist_id: String,
    /// RFC 3339 timestamp, must be in the future
    pub requested_date: String,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointmentStatusRequest {
    pub status: AppointmentStatus,
    /// Finalized date, only meaningful when confirming
    pub appointment_date: Option<String>,
}

/// Appointment as seen by one of its parties
#[derive(Debug, Clone, Serialize)]
pub struct AppointmentResponse {
    pub id: String,
    pub patient_id: String,
    pub therapist_id: String,
    pub status: String,
    pub requested_date: String,
    pub appointment_date: Option<String>,
    pub duration_minutes: i64,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// The other party, absent when its profile is gone
    pub counterpart: Option<ProfileSummary>,
}

impl AppointmentResponse {
    pub fn new(appointment: Appointment, counterpart: Option<ProfileSummary>) -> Self {
        let requested_date = appointment.effective_requested_date().to_string();
        Self {
            id: appointment.id,
            patient_id: appointment.patient_id,
            therapist_id: appointment.therapist_id,
            status: appointment.status,
            requested_date,
            appointment_date: appointment.appointment_date,
            duration_minutes: appointment.duration_minutes,
            notes: appointment.notes,
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
            counterpart,
        }
    }
}
