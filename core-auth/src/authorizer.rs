//! Bearer credential attachment for outbound API calls.
//!
//! [`RequestAuthorizer`] decorates the transport and implements
//! [`HttpClient`] itself, so API clients are unaware of it. For every request
//! to a protected endpoint it:
//!
//! 1. refreshes first if the access token is about to expire,
//! 2. attaches `Authorization: Bearer <access_token>` when signed in,
//! 3. on `401`, refreshes once and replays the request once.
//!
//! When the refresh fails, or the replay is refused again, the session is
//! ended and the caller receives the original `401` response. Login, register
//! and refresh URLs pass through untouched. Other error statuses are returned
//! as-is without touching the session.

use crate::error::AuthError;
use crate::gateway::AuthGateway;
use crate::session::SessionPublisher;
use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse, RetryPolicy, AUTHORIZATION};
use core_runtime::config::ApiConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RequestAuthorizer {
    inner: Arc<dyn HttpClient>,
    gateway: Arc<AuthGateway>,
    publisher: SessionPublisher,
    api: ApiConfig,
}

impl RequestAuthorizer {
    pub fn new(inner: Arc<dyn HttpClient>, gateway: Arc<AuthGateway>, api: ApiConfig) -> Self {
        let publisher = gateway.publisher().clone();
        Self {
            inner,
            gateway,
            publisher,
            api,
        }
    }

    async fn send(
        &self,
        request: HttpRequest,
        policy: Option<RetryPolicy>,
    ) -> BridgeResult<HttpResponse> {
        if self.api.is_auth_endpoint(&request.url) {
            return self.dispatch(request, policy).await;
        }

        self.refresh_if_expiring().await;

        let attached = self.session_token();
        let first = match &attached {
            Some(token) => with_bearer(request.clone(), token),
            None => request.clone(),
        };
        let response = self.dispatch(first, policy.clone()).await?;

        let Some(attached) = attached else {
            return Ok(response);
        };
        if !response.is_unauthorized() {
            return Ok(response);
        }

        info!(url = %request.url, "Access token refused; refreshing once");
        let ticket = self.publisher.begin();
        let token = match self.session_token() {
            Some(current) if current != attached => {
                debug!("Access token already replaced; replaying with it");
                current
            }
            _ => match self.gateway.refresh().await {
                Ok(pair) => pair.access_token().to_string(),
                Err(AuthError::Superseded) => return Ok(response),
                Err(e) => {
                    warn!(error = %e, "Refresh after 401 failed; ending session");
                    self.gateway.expire_session(ticket).await;
                    return Ok(response);
                }
            },
        };

        let ticket = self.publisher.begin();
        let retried = self.dispatch(with_bearer(request, &token), policy).await?;
        if retried.is_unauthorized() {
            warn!("Refreshed access token refused; ending session");
            self.gateway.expire_session(ticket).await;
        }
        Ok(retried)
    }

    /// The access token to attach, only while signed in.
    fn session_token(&self) -> Option<String> {
        if self.publisher.is_authenticated() {
            self.publisher.access_token()
        } else {
            None
        }
    }

    async fn refresh_if_expiring(&self) {
        if !self.publisher.is_authenticated() {
            return;
        }
        let Some(pair) = self.publisher.tokens() else {
            return;
        };

        let now = self.publisher.clock().now();
        let leeway = chrono::Duration::from_std(self.api.refresh_leeway())
            .unwrap_or_else(|_| chrono::Duration::zero());

        if pair.access_expires_within(now, leeway) && !pair.is_refresh_expired(now) {
            debug!(access_expires_at = %pair.access_expires_at(), "Refreshing before request");
            if let Err(e) = self.gateway.refresh().await {
                warn!(error = %e, "Proactive refresh failed");
            }
        }
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        policy: Option<RetryPolicy>,
    ) -> BridgeResult<HttpResponse> {
        match policy {
            Some(policy) => self.inner.execute_with_retry(request, policy).await,
            None => self.inner.execute(request).await,
        }
    }
}

fn with_bearer(mut request: HttpRequest, token: &str) -> HttpRequest {
    request.remove_header(AUTHORIZATION);
    request.bearer_token(token)
}

#[async_trait]
impl HttpClient for RequestAuthorizer {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        self.send(request, None).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> BridgeResult<HttpResponse> {
        self.send(request, Some(policy)).await
    }

    async fn is_connected(&self) -> bool {
        self.inner.is_connected().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{access_token, api, json_response, now, token_body, ScriptedHttpClient};
    use crate::token_store::TokenStore;
    use crate::types::TokenPair;
    use bridge_desktop::MemorySecureStore;
    use bridge_traits::error::BridgeError;
    use bridge_traits::http::HttpMethod;
    use bridge_traits::FixedClock;
    use chrono::Duration;
    use core_runtime::events::EventBus;
    use serde_json::json;
    use std::sync::Mutex;

    const WAREHOUSES: &str = "https://wms.test/api/v1/warehouses";

    struct Fixture {
        authorizer: RequestAuthorizer,
        http: Arc<ScriptedHttpClient>,
        publisher: SessionPublisher,
        transitions: Arc<Mutex<Vec<bool>>>,
        _handle: crate::session::ListenerHandle,
    }

    async fn fixture(access_ttl: Option<Duration>) -> Fixture {
        let store = TokenStore::new(Arc::new(MemorySecureStore::new()));
        if let Some(ttl) = access_ttl {
            let pair = TokenPair::new(
                access_token("alice", 0),
                "stored-refresh",
                now() + ttl,
                now() + Duration::days(1),
            )
            .unwrap();
            store.save(&pair).await.unwrap();
        }
        let publisher = SessionPublisher::restore(store, Arc::new(FixedClock::new(now()))).await;

        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&transitions);
        let handle = publisher.on_change(move |s| sink.lock().unwrap().push(s.is_authenticated()));

        let http = Arc::new(ScriptedHttpClient::new());
        let gateway = Arc::new(AuthGateway::new(
            http.clone(),
            api(),
            publisher.clone(),
            EventBus::new(16),
        ));
        Fixture {
            authorizer: RequestAuthorizer::new(http.clone(), gateway, api()),
            http,
            publisher,
            transitions,
            _handle: handle,
        }
    }

    fn get() -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, WAREHOUSES)
    }

    fn bearer(request: &HttpRequest) -> Option<String> {
        request.header_value(AUTHORIZATION).map(str::to_string)
    }

    #[tokio::test]
    async fn test_attaches_bearer_to_protected_requests() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http.reply(json_response(200, json!({ "success": true })));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_success());
        assert_eq!(
            bearer(&f.http.requests()[0]),
            Some(format!("Bearer {}", access_token("alice", 0)))
        );
    }

    #[tokio::test]
    async fn test_auth_endpoints_pass_through() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http.reply(json_response(401, json!({ "message": "Invalid credentials" })));

        let login = HttpRequest::new(HttpMethod::Post, "https://wms.test/api/v1/auth/login?x=1");
        let response = f.authorizer.execute(login).await.unwrap();

        assert!(response.is_unauthorized());
        assert_eq!(f.http.request_count(), 1);
        assert_eq!(bearer(&f.http.requests()[0]), None);
        assert!(f.publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_sent_bare() {
        let f = fixture(None).await;
        f.http.reply(HttpResponse::new(401, ""));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_unauthorized());
        assert_eq!(f.http.request_count(), 1);
        assert_eq!(bearer(&f.http.requests()[0]), None);
    }

    #[tokio::test]
    async fn test_refresh_and_replay_once_on_401() {
        let f = fixture(Some(Duration::hours(1))).await;
        let fresh = access_token("alice", 1);
        f.http
            .reply(HttpResponse::new(401, ""))
            .reply(json_response(200, token_body(&fresh, Duration::minutes(15))))
            .reply(json_response(200, json!({ "success": true })));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_success());

        let requests = f.http.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[1].url, "https://wms.test/api/v1/auth/refresh");
        assert_eq!(bearer(&requests[2]), Some(format!("Bearer {}", fresh)));
        assert_eq!(*f.transitions.lock().unwrap(), vec![true]);
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_original_401() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http
            .reply(json_response(401, json!({ "message": "token expired" })))
            .reply(json_response(401, json!({ "message": "refresh revoked" })));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_unauthorized());
        assert_eq!(response.text().unwrap(), r#"{"message":"token expired"}"#);
        assert_eq!(f.http.request_count(), 2);
        assert_eq!(*f.transitions.lock().unwrap(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_refresh_transport_failure_ends_session() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http
            .reply(HttpResponse::new(401, ""))
            .fail(BridgeError::Network("connection reset".to_string()));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_unauthorized());
        assert!(!f.publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_replay_refused_ends_session_without_loop() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http
            .reply(HttpResponse::new(401, ""))
            .reply(json_response(
                200,
                token_body(&access_token("alice", 1), Duration::minutes(15)),
            ))
            .reply(HttpResponse::new(401, ""));

        let response = f.authorizer.execute(get()).await.unwrap();
        assert!(response.is_unauthorized());
        assert_eq!(f.http.request_count(), 3);
        assert!(!f.publisher.is_authenticated());
    }

    #[tokio::test]
    async fn test_other_failures_leave_session_alone() {
        let f = fixture(Some(Duration::hours(1))).await;
        f.http
            .reply(HttpResponse::new(403, ""))
            .fail(BridgeError::Network("offline".to_string()));

        let forbidden = f.authorizer.execute(get()).await.unwrap();
        assert_eq!(forbidden.status, 403);

        let transport = f.authorizer.execute(get()).await;
        assert!(matches!(transport, Err(BridgeError::Network(_))));
        assert!(f.publisher.is_authenticated());
        assert_eq!(f.http.request_count(), 2);
    }

    #[tokio::test]
    async fn test_refreshes_before_request_when_token_is_expiring() {
        let f = fixture(Some(Duration::seconds(5))).await;
        let fresh = access_token("alice", 1);
        f.http
            .reply(json_response(200, token_body(&fresh, Duration::minutes(15))))
            .reply(json_response(200, json!({ "success": true })));

        f.authorizer.execute(get()).await.unwrap();

        let requests = f.http.requests();
        assert_eq!(requests[0].url, "https://wms.test/api/v1/auth/refresh");
        assert_eq!(bearer(&requests[1]), Some(format!("Bearer {}", fresh)));
    }
}
