//! Authentication status and route protection

use serde::{Deserialize, Serialize};

/// Where the session stands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    /// Persisted tokens have not been checked yet
    #[default]
    Loading,
    Authenticated,
    Anonymous,
}

impl AuthStatus {
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

/// What a protected view should do for the current status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    ShowLoading,
    Render,
    /// Send the user to the login view, remembering where they were going
    RedirectToLogin { from: String },
}

/// Decide how a protected route renders
pub fn guard_route(status: AuthStatus, location: &str) -> RouteDecision {
    match status {
        AuthStatus::Loading => RouteDecision::ShowLoading,
        AuthStatus::Authenticated => RouteDecision::Render,
        AuthStatus::Anonymous => RouteDecision::RedirectToLogin {
            from: location.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_routes_wait_then_render_or_redirect() {
        assert_eq!(guard_route(AuthStatus::Loading, "/patients"), RouteDecision::ShowLoading);
        assert_eq!(guard_route(AuthStatus::Authenticated, "/patients"), RouteDecision::Render);
        assert_eq!(
            guard_route(AuthStatus::Anonymous, "/patients/4"),
            RouteDecision::RedirectToLogin {
                from: "/patients/4".to_string()
            }
        );
    }

    #[test]
    fn only_authenticated_counts() {
        assert!(AuthStatus::Authenticated.is_authenticated());
        assert!(!AuthStatus::Loading.is_authenticated());
        assert!(!AuthStatus::Anonymous.is_authenticated());
    }
}
