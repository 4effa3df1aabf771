//! Route guard decisions for client navigation.
//!
//! Given the path a client is about to show and whether it holds a session,
//! decide whether to let it through or where to send it instead. Role
//! lookups are bounded by a timeout; what happens when the lookup stalls is
//! configurable (`session.fail_open_on_timeout`).

use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::Role;

pub const LOGIN_ROUTE: &str = "/login";

const PUBLIC_ROUTES: &[&str] = &[
    "/login",
    "/signup",
    "/patient/ptsignup",
    "/psychologue/psysignup",
];

/// Path fragments of screens any signed-in caller may open
const AUTHENTICATED_ROUTE_KEYS: &[&str] = &[
    "feed",
    "search",
    "appointments",
    "chat",
    "rating",
    "profile",
    "admin",
    "admin-dashboard",
    "Mainpt",
    "Mainps",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RouteDecision {
    Allow,
    Redirect { to: String },
}

impl RouteDecision {
    fn redirect(to: &str) -> Self {
        RouteDecision::Redirect { to: to.to_string() }
    }
}

pub fn is_public_route(path: &str) -> bool {
    PUBLIC_ROUTES
        .iter()
        .any(|route| path == *route || path.ends_with(route))
}

pub fn is_authenticated_route(path: &str) -> bool {
    AUTHENTICATED_ROUTE_KEYS.iter().any(|key| path.contains(key))
}

/// Home screen for a role; callers without a resolvable role land as patients
pub fn landing_for(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Admin) => "/admin-dashboard",
        Some(Role::Psychologue) => "/psychologue/Mainps",
        Some(Role::Patient) | None => "/patient/Mainpt",
    }
}

/// Decision for a caller without a session
pub fn decide_anonymous(path: &str) -> RouteDecision {
    if is_public_route(path) {
        RouteDecision::Allow
    } else {
        RouteDecision::redirect(LOGIN_ROUTE)
    }
}

/// Decision for a signed-in caller whose role lookup finished
pub fn decide_signed_in(path: &str, role: Option<Role>) -> RouteDecision {
    if is_authenticated_route(path) {
        RouteDecision::Allow
    } else {
        RouteDecision::redirect(landing_for(role))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverOptions {
    pub timeout: Duration,
    pub fail_open: bool,
}

impl From<&crate::config::SessionConfig> for ResolverOptions {
    fn from(config: &crate::config::SessionConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.role_resolve_timeout_ms),
            fail_open: config.fail_open_on_timeout,
        }
    }
}

/// Resolve the route for a signed-in caller.
///
/// `lookup_role` is only awaited when the path is not already an
/// authenticated screen. A failed lookup lands the caller on the default
/// screen; a stalled one is let through or sent to login depending on
/// `options.fail_open`.
pub async fn resolve_signed_in<F, E>(
    path: &str,
    lookup_role: F,
    options: ResolverOptions,
) -> RouteDecision
where
    F: Future<Output = Result<Option<Role>, E>>,
    E: std::fmt::Display,
{
    if is_authenticated_route(path) {
        return RouteDecision::Allow;
    }

    match tokio::time::timeout(options.timeout, lookup_role).await {
        Ok(Ok(role)) => decide_signed_in(path, role),
        Ok(Err(e)) => {
            debug!(path = path, error = %e, "Role lookup failed, using default landing");
            decide_signed_in(path, None)
        }
        Err(_) => {
            warn!(
                path = path,
                timeout_ms = options.timeout.as_millis() as u64,
                fail_open = options.fail_open,
                "Role lookup timed out"
            );
            if options.fail_open {
                RouteDecision::Allow
            } else {
                RouteDecision::redirect(LOGIN_ROUTE)
            }
        }
    }
}
