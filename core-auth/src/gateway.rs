//! # Auth Gateway
//!
//! Network boundary for authentication: login, token refresh, session restore
//! and logout.
//!
//! ## Overview
//!
//! The gateway talks to the raw transport (never through the request
//! authorizer) and turns backend responses into session transitions on the
//! [`SessionPublisher`]:
//!
//! | Operation         | Success                       | Failure                                   |
//! |-------------------|-------------------------------|-------------------------------------------|
//! | `login`           | `Authenticated`               | state untouched                           |
//! | `refresh`         | `Authenticated`, new pair     | rejected: `Unauthenticated`; network or 5xx: untouched |
//! | `restore_session` | refresh when only the refresh token is live | as `refresh`               |
//! | `logout`          | `Unauthenticated`             | revocation failures are only logged       |
//!
//! Login and refresh take a [`Ticket`](crate::session::Ticket) before they go
//! on the wire, so a slow response never overwrites a newer outcome. Logout
//! takes its ticket once revocation returns; it overrides any refresh that
//! was in flight.
//!
//! ## Refresh policy
//!
//! Refresh tokens rotate: a refresh token in the response replaces the stored
//! one. When the response omits it, the previous refresh token and its expiry
//! are kept. Concurrent refreshes coalesce; callers that waited for an
//! in-flight refresh receive its result instead of issuing their own.

use crate::claims::AccessClaims;
use crate::error::{AuthError, Result};
use crate::session::{SessionPublisher, Ticket};
use crate::types::{Credentials, SessionState, TokenPair, UserInfo};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use core_runtime::config::{ApiConfig, Endpoint};
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, Notification, SignOutReason};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

/// Numeric expiries above this are read as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expiry {
    Unix(i64),
    Text(String),
}

impl Expiry {
    fn to_datetime(&self) -> Result<DateTime<Utc>> {
        match self {
            Expiry::Unix(value) => from_unix(*value),
            Expiry::Text(text) => {
                let text = text.trim();
                if let Ok(value) = text.parse::<i64>() {
                    return from_unix(value);
                }
                if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                    return Ok(parsed.with_timezone(&Utc));
                }
                NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                    .map(|naive| Utc.from_utc_datetime(&naive))
                    .map_err(|_| AuthError::InvalidResponse(format!("unreadable expiry '{}'", text)))
            }
        }
    }
}

fn from_unix(value: i64) -> Result<DateTime<Utc>> {
    let parsed = if value.abs() >= MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    };
    parsed.ok_or_else(|| AuthError::InvalidResponse(format!("expiry {} is out of range", value)))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expire_access_token: Expiry,
    #[serde(default)]
    expire_refresh_token: Option<Expiry>,
    #[serde(default)]
    ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenEnvelope {
    Wrapped { data: TokenResponse },
    Bare(TokenResponse),
}

impl TokenEnvelope {
    fn into_inner(self) -> TokenResponse {
        match self {
            TokenEnvelope::Wrapped { data } => data,
            TokenEnvelope::Bare(response) => response,
        }
    }
}

impl TokenResponse {
    /// Build the new pair. `previous` supplies the refresh token when the
    /// backend did not rotate it.
    fn into_pair(self, previous: Option<&TokenPair>) -> Result<TokenPair> {
        let access_expires_at = self.expire_access_token.to_datetime()?;
        let rotated = self.refresh_token.filter(|token| !token.is_empty());

        match (rotated, previous) {
            (Some(refresh_token), previous) => {
                let refresh_expires_at = match (&self.expire_refresh_token, previous) {
                    (Some(expiry), _) => expiry.to_datetime()?,
                    (None, Some(previous)) => previous.refresh_expires_at(),
                    (None, None) => {
                        return Err(AuthError::InvalidResponse(
                            "refresh token expiry is missing".to_string(),
                        ))
                    }
                };
                TokenPair::new(
                    self.access_token,
                    refresh_token,
                    access_expires_at,
                    refresh_expires_at,
                )
            }
            (None, Some(previous)) => TokenPair::new(
                self.access_token,
                previous.refresh_token(),
                access_expires_at.min(previous.refresh_expires_at()),
                previous.refresh_expires_at(),
            ),
            (None, None) => Err(AuthError::InvalidResponse(
                "refresh token is missing".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Classify a non-2xx response. Only 4xx is a rejection and keeps the
/// backend's message.
fn rejection(response: &HttpResponse) -> AuthError {
    match response.status {
        status @ 400..=499 => {
            let message = response
                .json::<ErrorBody>()
                .ok()
                .and_then(|body| body.message.or(body.error))
                .unwrap_or_default();
            AuthError::Rejected { status, message }
        }
        status @ 500..=599 => AuthError::Server { status },
        status => AuthError::InvalidResponse(format!("unexpected status {}", status)),
    }
}

fn parse_tokens(response: &HttpResponse) -> Result<TokenResponse> {
    if !response.is_success() {
        return Err(rejection(response));
    }
    response
        .json::<TokenEnvelope>()
        .map(TokenEnvelope::into_inner)
        .map_err(|e| AuthError::InvalidResponse(e.to_string()))
}

fn identify(pair: &TokenPair, fallback_username: Option<&str>) -> Result<UserInfo> {
    AccessClaims::decode(pair.access_token())
        .and_then(|claims| claims.user_info(fallback_username))
        .map_err(|e| AuthError::InvalidResponse(format!("unusable access token: {}", e)))
}

/// Login, refresh and logout against the backend.
pub struct AuthGateway {
    http_client: Arc<dyn HttpClient>,
    api: ApiConfig,
    publisher: SessionPublisher,
    event_bus: EventBus,
    refresh_lock: Mutex<()>,
}

impl AuthGateway {
    /// `http_client` must be the raw transport, not a [`RequestAuthorizer`](crate::RequestAuthorizer).
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        api: ApiConfig,
        publisher: SessionPublisher,
        event_bus: EventBus,
    ) -> Self {
        Self {
            http_client,
            api,
            publisher,
            event_bus,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn publisher(&self) -> &SessionPublisher {
        &self.publisher
    }

    /// Exchange credentials for a token pair.
    ///
    /// A failed login never changes the session state, whether or not someone
    /// was already signed in.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Validation`] before anything is sent
    /// - [`AuthError::Rejected`] with the backend message on 4xx
    /// - [`AuthError::Server`] on 5xx
    /// - [`AuthError::Network`] on transport failure or timeout
    /// - [`AuthError::Superseded`] if a newer login or logout landed first
    #[instrument(skip(self, credentials), fields(username = %credentials.username()))]
    pub async fn login(&self, credentials: Credentials) -> Result<SessionState> {
        credentials.validate()?;

        let was_authenticated = self.publisher.is_authenticated();
        let ticket = self.publisher.begin_user_action();
        match self.try_login(ticket, &credentials).await {
            Ok(state) => {
                info!("Login succeeded");
                self.emit(CoreEvent::Auth(AuthEvent::SignedIn {
                    username: credentials.username().to_string(),
                }));
                Ok(state)
            }
            Err(AuthError::Superseded) => {
                debug!("Login response arrived after a newer transition");
                Err(AuthError::Superseded)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.emit_failure(&e);
                self.announce_if_lost(was_authenticated);
                Err(e)
            }
        }
    }

    async fn try_login(&self, ticket: Ticket, credentials: &Credentials) -> Result<SessionState> {
        let request = HttpRequest::new(HttpMethod::Post, self.api.url(Endpoint::Login)?)
            .json(&LoginRequest {
                username: credentials.username(),
                password: credentials.password(),
            })
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let response = self.send(request).await?;
        let tokens = parse_tokens(&response)?;
        if let Some(ip) = tokens.ip.as_deref() {
            debug!(ip, "Login accepted");
        }

        let pair = tokens.into_pair(None)?;
        let user = identify(&pair, Some(credentials.username()))?;
        self.publisher.commit_authenticated(ticket, pair, user).await
    }

    /// Obtain a new access token with the stored refresh token.
    ///
    /// A rejected or unusable refresh signs the session out. Transport and
    /// server failures leave it untouched.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<TokenPair> {
        let seen = self.publisher.access_token();
        let _guard = self.refresh_lock.lock().await;

        // Issued before the tokens are read, so a logout that clears them
        // afterwards also invalidates this refresh.
        let ticket = self.publisher.begin();
        let now = self.publisher.clock().now();
        let was_authenticated = self.publisher.is_authenticated();
        let Some(current) = self.publisher.tokens() else {
            debug!("No tokens to refresh");
            return Err(AuthError::NotAuthenticated);
        };

        if seen.as_deref() != Some(current.access_token()) && !current.is_access_expired(now) {
            debug!("Tokens were refreshed while waiting; reusing them");
            return Ok(current);
        }

        if current.is_refresh_expired(now) {
            info!("Refresh token expired");
            self.expire_session(ticket).await;
            return Err(AuthError::NotAuthenticated);
        }

        self.emit(CoreEvent::Auth(AuthEvent::TokenRefreshing));

        match self.try_refresh(ticket, &current).await {
            Ok(pair) => {
                info!(access_expires_at = %pair.access_expires_at(), "Token refreshed");
                self.emit(CoreEvent::Auth(AuthEvent::TokenRefreshed {
                    expires_at: pair.access_expires_at().timestamp(),
                }));
                Ok(pair)
            }
            Err(AuthError::Superseded) => {
                debug!("Refresh response arrived after a newer transition");
                Err(AuthError::Superseded)
            }
            Err(
                e @ (AuthError::Rejected { .. }
                | AuthError::InvalidResponse(_)
                | AuthError::TokenCorrupted(_)),
            ) => {
                warn!(error = %e, "Refresh rejected; ending session");
                self.expire_session(ticket).await;
                Err(e)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed");
                self.emit_failure(&e);
                self.announce_if_lost(was_authenticated);
                Err(e)
            }
        }
    }

    async fn try_refresh(&self, ticket: Ticket, current: &TokenPair) -> Result<TokenPair> {
        let request = HttpRequest::new(HttpMethod::Post, self.api.url(Endpoint::Refresh)?)
            .json(&RefreshRequest {
                refresh_token: current.refresh_token(),
            })
            .map_err(|e| AuthError::Validation(e.to_string()))?;

        let response = self.send(request).await?;
        let pair = parse_tokens(&response)?.into_pair(Some(current))?;

        let known_username = self.publisher.current().user().map(|u| u.username.clone());
        let user = identify(&pair, known_username.as_deref())?;

        self.publisher
            .commit_authenticated(ticket, pair.clone(), user)
            .await?;
        Ok(pair)
    }

    /// Re-enter `Authenticated` after startup when only the refresh token is
    /// still valid. Returns the resulting state.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Result<SessionState> {
        let current = self.publisher.current();
        if current.is_authenticated() {
            return Ok(current);
        }

        let now = self.publisher.clock().now();
        match self.publisher.tokens() {
            Some(pair) if !pair.is_refresh_expired(now) => {}
            _ => return Ok(current),
        }

        info!("Restoring session with the stored refresh token");
        self.refresh().await?;

        let state = self.publisher.current();
        if let Some(user) = state.user() {
            self.emit(CoreEvent::Auth(AuthEvent::SignedIn {
                username: user.username.clone(),
            }));
        }
        Ok(state)
    }

    /// Sign out. Calls the revocation endpoint first when one is configured;
    /// its failures are logged and ignored. Safe to call repeatedly.
    ///
    /// Always ends the session, including one a background refresh renewed
    /// while revocation was in flight.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        if let Some(pair) = self.publisher.tokens() {
            self.revoke(&pair).await;
        }

        let was_authenticated = self.publisher.is_authenticated();
        let ticket = self.publisher.begin_user_action();
        let cleared = match self.publisher.commit_unauthenticated(ticket).await {
            Ok(_) => Ok(()),
            Err(AuthError::Superseded) => {
                debug!("Logout overtaken by a newer login");
                return Ok(());
            }
            Err(e) => Err(e),
        };

        if was_authenticated {
            info!("User logged out");
            self.emit(CoreEvent::Auth(AuthEvent::SignedOut {
                reason: SignOutReason::UserInitiated,
            }));
        }
        cleared
    }

    /// Sign out because the backend no longer accepts the session.
    ///
    /// Emits `SignedOut { SessionExpired }` and a warning notification when
    /// this call ended an authenticated session.
    pub async fn expire_session(&self, ticket: Ticket) {
        let was_authenticated = self.publisher.is_authenticated();

        match self.publisher.commit_unauthenticated(ticket).await {
            Ok(_) => {}
            Err(AuthError::Superseded) => {
                debug!("Session expiry overtaken by a newer transition");
                return;
            }
            Err(e) => warn!(error = %e, "Failed to clear expired tokens"),
        }

        self.announce_if_lost(was_authenticated);
    }

    /// Report a session that ended without the user asking, e.g. when
    /// renewed tokens could not be stored.
    fn announce_if_lost(&self, was_authenticated: bool) {
        if !was_authenticated || self.publisher.is_authenticated() {
            return;
        }
        info!("Session expired");
        self.emit(CoreEvent::Auth(AuthEvent::SignedOut {
            reason: SignOutReason::SessionExpired,
        }));
        self.emit(CoreEvent::Notification(Notification::warning(
            AuthError::AuthorizationExpired.user_message(),
        )));
    }

    async fn revoke(&self, pair: &TokenPair) {
        if !self.api.has_endpoint(Endpoint::Logout) {
            return;
        }

        let request = match self.api.url(Endpoint::Logout) {
            Ok(url) => HttpRequest::new(HttpMethod::Post, url)
                .bearer_token(pair.access_token())
                .json(&RefreshRequest {
                    refresh_token: pair.refresh_token(),
                }),
            Err(e) => {
                warn!(error = %e, "Logout endpoint unusable");
                return;
            }
        };

        let result = match request {
            Ok(request) => self.send(request).await,
            Err(e) => Err(AuthError::Validation(e.to_string())),
        };

        match result {
            Ok(response) if response.is_success() => debug!("Tokens revoked"),
            Ok(response) => warn!(status = response.status, "Token revocation refused"),
            Err(e) => warn!(error = %e, "Token revocation failed"),
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let limit = self.api.request_timeout();
        let url = request.url.clone();

        match timeout(limit, self.http_client.execute(request.timeout(limit))).await {
            Ok(result) => result.map_err(|e| {
                warn!(url = %url, error = %e, "Auth request failed");
                AuthError::from(e)
            }),
            Err(_) => {
                warn!(url = %url, ?limit, "Auth request timed out");
                Err(AuthError::Network(format!(
                    "request timed out after {}s",
                    limit.as_secs()
                )))
            }
        }
    }

    fn emit(&self, event: CoreEvent) {
        let _ = self.event_bus.emit(event);
    }

    fn emit_failure(&self, error: &AuthError) {
        self.emit(CoreEvent::Auth(AuthEvent::AuthError {
            message: error.user_message(),
            recoverable: error.is_recoverable(),
        }));
    }
}

impl fmt::Debug for AuthGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGateway")
            .field("base_url", &self.api.base_url().as_str())
            .field("publisher", &self.publisher)
            .finish()
    }
}
