use crate::error::{AuthError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const MAX_USERNAME_LEN: usize = 150;
const MAX_PASSWORD_LEN: usize = 256;

/// Username and password for a single login attempt.
///
/// Never persisted. The `Debug` implementation redacts the password.
///
/// # Examples
///
/// ```
/// use core_auth::Credentials;
///
/// let credentials = Credentials::new("alice", "secret1");
/// assert!(credentials.validate().is_ok());
/// assert!(!format!("{:?}", credentials).contains("secret1"));
/// ```
#[derive(Clone, Serialize)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Local checks run before anything is sent.
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(AuthError::Validation("Username is required.".to_string()));
        }
        if self.username.chars().count() > MAX_USERNAME_LEN {
            return Err(AuthError::Validation(format!(
                "Username must be at most {} characters.",
                MAX_USERNAME_LEN
            )));
        }
        if self.username.chars().any(char::is_whitespace) {
            return Err(AuthError::Validation(
                "Username must not contain spaces.".to_string(),
            ));
        }
        if self.password.is_empty() {
            return Err(AuthError::Validation("Password is required.".to_string()));
        }
        if self.password.chars().count() > MAX_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Password must be at most {} characters.",
                MAX_PASSWORD_LEN
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Access and refresh credentials issued by the backend.
///
/// Invariant: the access token never outlives the refresh token.
///
/// # Security
///
/// The `Debug` implementation redacts both tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    access_token: String,
    refresh_token: String,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
}

impl TokenPair {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        let access_token = access_token.into();
        let refresh_token = refresh_token.into();

        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(AuthError::InvalidResponse(
                "Token pair contains an empty token".to_string(),
            ));
        }
        if access_expires_at > refresh_expires_at {
            return Err(AuthError::InvalidResponse(
                "Access token expires after the refresh token".to_string(),
            ));
        }

        Ok(Self {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    pub fn access_expires_at(&self) -> DateTime<Utc> {
        self.access_expires_at
    }

    pub fn refresh_expires_at(&self) -> DateTime<Utc> {
        self.refresh_expires_at
    }

    pub fn is_access_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.access_expires_at
    }

    /// True when the access token expires within `leeway` of `now`.
    pub fn access_expires_within(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        now + leeway >= self.access_expires_at
    }

    pub fn is_refresh_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.refresh_expires_at
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

/// Identity of the signed-in user, decoded from the access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
}

/// The two states of the session machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthStatus {
    Authenticated,
    Unauthenticated,
}

/// The client's current belief about who is signed in.
///
/// Only the session publisher constructs these; consumers read them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SessionState {
    is_authenticated: bool,
    user: Option<UserInfo>,
    roles: BTreeSet<String>,
}

impl SessionState {
    pub(crate) fn authenticated(user: UserInfo, roles: BTreeSet<String>) -> Self {
        Self {
            is_authenticated: true,
            user: Some(user),
            roles,
        }
    }

    pub fn unauthenticated() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn status(&self) -> AuthStatus {
        if self.is_authenticated {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }

    pub fn user(&self) -> Option<&UserInfo> {
        self.user.as_ref()
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}
