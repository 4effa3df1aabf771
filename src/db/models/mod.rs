//! Database models split into domain-specific modules.

pub mod appointment;
pub mod audit;
pub mod chat;
pub mod post;
pub mod profile;
pub mod rating;
pub mod stats;
pub mod user;

pub use appointment::*;
pub use audit::*;
pub use chat::*;
pub use post::*;
pub use profile::*;
pub use rating::*;
pub use stats::*;
pub use user::*;
