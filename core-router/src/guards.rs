use crate::route::Route;
use core_auth::{SessionPublisher, SessionState};
use tracing::{debug, warn};

/// Query parameter carrying the destination to resume after login.
pub const RETURN_URL_PARAM: &str = "returnUrl";

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Route),
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Guards bound to one session publisher and the application's two
/// well-known routes.
#[derive(Debug, Clone)]
pub struct RouteGuards {
    publisher: SessionPublisher,
    login_route: Route,
    landing_route: Route,
}

impl RouteGuards {
    pub fn new(publisher: SessionPublisher, login_route: Route, landing_route: Route) -> Self {
        Self {
            publisher,
            login_route,
            landing_route,
        }
    }

    pub fn login_route(&self) -> &Route {
        &self.login_route
    }

    pub fn landing_route(&self) -> &Route {
        &self.landing_route
    }

    /// Allow only signed-in users. Others go to the login route, which
    /// carries `target` in `returnUrl`.
    pub fn require_auth(&self, target: &Route) -> GuardDecision {
        if self.publisher.is_authenticated() {
            return GuardDecision::Allow;
        }

        debug!(target = %target, "Navigation requires sign-in");
        GuardDecision::Redirect(self.login_redirect(target))
    }

    /// Allow only signed-out users (login, register). Signed-in users go to
    /// the landing route.
    pub fn require_guest(&self, target: &Route) -> GuardDecision {
        if !self.publisher.is_authenticated() {
            return GuardDecision::Allow;
        }

        debug!(target = %target, "Already signed in; redirecting to landing route");
        GuardDecision::Redirect(self.landing_route.clone())
    }

    /// Allow signed-in users holding `role`. Signed-out users are sent to
    /// login like [`require_auth`](Self::require_auth); signed-in users
    /// without the role go to the landing route.
    pub fn require_role(&self, target: &Route, role: &str) -> GuardDecision {
        let state: SessionState = self.publisher.current();
        if !state.is_authenticated() {
            return GuardDecision::Redirect(self.login_redirect(target));
        }
        if state.has_role(role) {
            GuardDecision::Allow
        } else {
            debug!(target = %target, role, "Missing role for route");
            GuardDecision::Redirect(self.landing_route.clone())
        }
    }

    /// Where to go after a successful login, given the login route the user
    /// arrived on. Falls back to the landing route when the preserved target
    /// is missing, points outside the application or back at login.
    pub fn post_login_destination(&self, login_route: &Route) -> Route {
        let Some(raw) = login_route.query_value(RETURN_URL_PARAM) else {
            return self.landing_route.clone();
        };

        match Route::parse(raw) {
            Ok(target) if !target.same_path(&self.login_route) => target,
            Ok(_) => self.landing_route.clone(),
            Err(e) => {
                warn!(error = %e, "Ignoring unsafe return destination");
                self.landing_route.clone()
            }
        }
    }

    fn login_redirect(&self, target: &Route) -> Route {
        if target.same_path(&self.login_route) {
            return self.login_route.clone();
        }
        self.login_route
            .clone()
            .with_query(RETURN_URL_PARAM, target.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use bridge_desktop::MemorySecureStore;
    use bridge_traits::SystemClock;
    use chrono::{Duration, Utc};
    use core_auth::{TokenPair, TokenStore, UserInfo};
    use std::sync::Arc;

    async fn guards(signed_in_roles: Option<&[&str]>) -> RouteGuards {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        let publisher = SessionPublisher::restore(store, Arc::new(SystemClock)).await;

        if let Some(roles) = signed_in_roles {
            let access = test_token(roles);
            let pair = TokenPair::new(
                access,
                "refresh",
                Utc::now() + Duration::hours(1),
                Utc::now() + Duration::days(1),
            )
            .unwrap();
            let user = UserInfo {
                id: "1".to_string(),
                username: "alice".to_string(),
                email: None,
                full_name: None,
            };
            publisher.set_authenticated(pair, user).await.unwrap();
        }

        RouteGuards::new(publisher, Route::new("/login"), Route::new("/dashboard"))
    }

    /// Unsigned JWT whose payload only carries `roles`.
    fn test_token(roles: &[&str]) -> String {
        let payload = serde_json::json!({ "sub": "1", "roles": roles });
        format!(
            "e30.{}.sig",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[tokio::test]
    async fn test_require_auth_redirects_with_return_url() {
        let guards = guards(None).await;
        let target = Route::parse("/warehouses?page=2").unwrap();

        let GuardDecision::Redirect(redirect) = guards.require_auth(&target) else {
            panic!("expected redirect");
        };
        assert_eq!(redirect.path(), "/login");
        assert_eq!(
            redirect.query_value(RETURN_URL_PARAM),
            Some("/warehouses?page=2")
        );
        assert_eq!(guards.post_login_destination(&redirect), target);
    }

    #[tokio::test]
    async fn test_require_auth_allows_signed_in_user() {
        let guards = guards(Some(&[])).await;
        assert!(guards.require_auth(&Route::new("/warehouses")).is_allowed());
    }

    #[tokio::test]
    async fn test_require_guest() {
        let signed_out = guards(None).await;
        assert!(signed_out.require_guest(&Route::new("/login")).is_allowed());

        let signed_in = guards(Some(&[])).await;
        assert_eq!(
            signed_in.require_guest(&Route::new("/login")),
            GuardDecision::Redirect(Route::new("/dashboard"))
        );
    }

    #[tokio::test]
    async fn test_require_role() {
        let target = Route::new("/admin/users");

        let admin = guards(Some(&["ADMIN"])).await;
        assert!(admin.require_role(&target, "ADMIN").is_allowed());

        let staff = guards(Some(&["STAFF"])).await;
        assert_eq!(
            staff.require_role(&target, "ADMIN"),
            GuardDecision::Redirect(Route::new("/dashboard"))
        );

        let anonymous = guards(None).await;
        assert!(matches!(
            anonymous.require_role(&target, "ADMIN"),
            GuardDecision::Redirect(route) if route.path() == "/login"
        ));
    }

    #[tokio::test]
    async fn test_post_login_destination_rejects_unsafe_targets() {
        let guards = guards(None).await;
        for unsafe_target in ["https://evil.example/", "//evil.example", "/login?returnUrl=/x"] {
            let login = Route::new("/login").with_query(RETURN_URL_PARAM, unsafe_target);
            assert_eq!(
                guards.post_login_destination(&login),
                Route::new("/dashboard"),
                "{}",
                unsafe_target
            );
        }
        assert_eq!(
            guards.post_login_destination(&Route::new("/login")),
            Route::new("/dashboard")
        );
    }

    #[tokio::test]
    async fn test_guards_follow_session_changes() {
        let guards = guards(Some(&[])).await;
        let target = Route::new("/warehouses");
        assert!(guards.require_auth(&target).is_allowed());

        guards.publisher.set_unauthenticated().await.unwrap();
        assert!(!guards.require_auth(&target).is_allowed());
    }
}
