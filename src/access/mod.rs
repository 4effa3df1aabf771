//! Capability-based access control.
//!
//! Every action a caller can take maps to a [`Capability`]. The set a caller
//! holds is a pure function of `(role, is_verified)`; handlers call
//! [`Actor::require`] before touching storage. A therapist whose account is
//! still pending verification keeps only the browse capabilities and
//! certificate upload.

use serde::Serialize;
use thiserror::Error;

use crate::db::{Profile, Role};

/// An action gated by role and verification status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    BrowseFeed,
    SearchTherapists,
    ViewProfiles,
    UploadCertificate,
    EditProfile,
    CreatePost,
    Like,
    Comment,
    BookAppointment,
    RateTherapist,
    ManageAppointments,
    Chat,
    VerifyTherapists,
    ModerateContent,
    CompleteAppointments,
    ViewAuditLog,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::BrowseFeed => "browse_feed",
            Capability::SearchTherapists => "search_therapists",
            Capability::ViewProfiles => "view_profiles",
            Capability::UploadCertificate => "upload_certificate",
            Capability::EditProfile => "edit_profile",
            Capability::CreatePost => "create_post",
            Capability::Like => "like",
            Capability::Comment => "comment",
            Capability::BookAppointment => "book_appointment",
            Capability::RateTherapist => "rate_therapist",
            Capability::ManageAppointments => "manage_appointments",
            Capability::Chat => "chat",
            Capability::VerifyTherapists => "verify_therapists",
            Capability::ModerateContent => "moderate_content",
            Capability::CompleteAppointments => "complete_appointments",
            Capability::ViewAuditLog => "view_audit_log",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const PATIENT: &[Capability] = &[
    Capability::BrowseFeed,
    Capability::SearchTherapists,
    Capability::ViewProfiles,
    Capability::EditProfile,
    Capability::CreatePost,
    Capability::Like,
    Capability::Comment,
    Capability::BookAppointment,
    Capability::RateTherapist,
    Capability::Chat,
];

const VERIFIED_THERAPIST: &[Capability] = &[
    Capability::BrowseFeed,
    Capability::SearchTherapists,
    Capability::ViewProfiles,
    Capability::UploadCertificate,
    Capability::EditProfile,
    Capability::CreatePost,
    Capability::Like,
    Capability::Comment,
    Capability::ManageAppointments,
    Capability::Chat,
];

const PENDING_THERAPIST: &[Capability] = &[
    Capability::BrowseFeed,
    Capability::SearchTherapists,
    Capability::ViewProfiles,
    Capability::UploadCertificate,
];

const ADMIN: &[Capability] = &[
    Capability::BrowseFeed,
    Capability::SearchTherapists,
    Capability::ViewProfiles,
    Capability::EditProfile,
    Capability::CreatePost,
    Capability::Like,
    Capability::Comment,
    Capability::VerifyTherapists,
    Capability::ModerateContent,
    Capability::CompleteAppointments,
    Capability::ViewAuditLog,
];

/// The capability set for a role and verification status
pub fn capabilities(role: Role, is_verified: bool) -> &'static [Capability] {
    match (role, is_verified) {
        (Role::Patient, _) => PATIENT,
        (Role::Psychologue, true) => VERIFIED_THERAPIST,
        (Role::Psychologue, false) => PENDING_THERAPIST,
        (Role::Admin, _) => ADMIN,
    }
}

/// A therapist account that an admin has not verified yet
pub fn is_restricted(role: Role, is_verified: bool) -> bool {
    role == Role::Psychologue && !is_verified
}

/// Why a capability check failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessDenied {
    #[error("Your account is pending verification")]
    PendingVerification(Capability),

    #[error("Your role is not allowed to {0}")]
    Role(Capability),
}

impl AccessDenied {
    pub fn capability(&self) -> Capability {
        match self {
            AccessDenied::PendingVerification(c) | AccessDenied::Role(c) => *c,
        }
    }
}

/// The authenticated caller as seen by the rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub role: Role,
    pub is_verified: bool,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role, is_verified: bool) -> Self {
        Self {
            id: id.into(),
            role,
            is_verified,
        }
    }

    pub fn from_profile(profile: &Profile) -> Self {
        Self::new(profile.id.clone(), profile.role_enum(), profile.is_verified)
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        capabilities(self.role, self.is_verified)
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn is_restricted(&self) -> bool {
        is_restricted(self.role, self.is_verified)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with the reason the capability is missing.
    ///
    /// A pending therapist is refused with `PendingVerification` for anything
    /// a verified therapist could do, so the client can show the notice.
    pub fn require(&self, capability: Capability) -> Result<(), AccessDenied> {
        if self.can(capability) {
            return Ok(());
        }
        if self.is_restricted() && capabilities(Role::Psychologue, true).contains(&capability) {
            return Err(AccessDenied::PendingVerification(capability));
        }
        Err(AccessDenied::Role(capability))
    }
}
