//! Server-side business rules: booking, appointment status changes and the
//! chat gate.

pub mod appointments;
pub mod chat_gate;

use thiserror::Error;

use crate::access::AccessDenied;
use crate::db::AppointmentStatus;

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Access(#[from] AccessDenied),

    #[error("{field} must be a valid RFC 3339 timestamp")]
    InvalidDate { field: &'static str },

    #[error("{field} must be in the future")]
    PastDate { field: &'static str },

    #[error("Duration must be one of 30, 60, 90 or 120 minutes, got {0}")]
    InvalidDuration(i64),

    #[error("Therapist is not available for booking")]
    TherapistUnavailable,

    #[error("You cannot book an appointment with yourself")]
    SelfBooking,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Cannot move an appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("{0}")]
    NotAllowed(&'static str),

    #[error("Appointment was modified concurrently, reload and retry")]
    StaleState,

    #[error("Chat is available once an appointment is confirmed")]
    ChatLocked,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
