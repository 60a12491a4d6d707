use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Credentials were malformed; nothing was sent.
    #[error("Invalid credentials: {0}")]
    Validation(String),

    /// The backend refused the credentials or the refresh token.
    #[error("Authentication rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The backend failed (5xx); credentials were not judged.
    #[error("Server error (status {status})")]
    Server { status: u16 },

    /// Transport failure or timeout.
    #[error("Network error: {0}")]
    Network(String),

    /// A protected call was refused with an authorization failure.
    #[error("Authorization expired")]
    AuthorizationExpired,

    #[error("Not authenticated")]
    NotAuthenticated,

    /// A newer transition was applied first; this result was discarded.
    #[error("Superseded by a more recent authentication request")]
    Superseded,

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Credential storage unavailable: {0}")]
    Storage(String),

    #[error("Stored tokens are corrupted: {0}")]
    TokenCorrupted(String),

    /// An endpoint could not be resolved from the API configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(reason) => reason.clone(),
            AuthError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            AuthError::Rejected { .. } => "The server rejected the request.".to_string(),
            AuthError::Server { .. } => {
                "The server encountered an error. Please try again later.".to_string()
            }
            AuthError::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            AuthError::AuthorizationExpired | AuthError::NotAuthenticated => {
                "Your session has expired. Please sign in again.".to_string()
            }
            AuthError::Superseded => "The request was replaced by a newer one.".to_string(),
            AuthError::InvalidResponse(_) => {
                "The server returned an unexpected response.".to_string()
            }
            AuthError::Storage(_) | AuthError::TokenCorrupted(_) => {
                "Your saved sign-in could not be read. Please sign in again.".to_string()
            }
            AuthError::Config(_) => "The application is not configured correctly.".to_string(),
        }
    }

    /// Whether retrying the same operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AuthError::Network(_) | AuthError::Server { .. } | AuthError::Storage(_)
        )
    }
}

impl From<core_runtime::Error> for AuthError {
    fn from(error: core_runtime::Error) -> Self {
        AuthError::Config(error.to_string())
    }
}

impl From<BridgeError> for AuthError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Network(_) | BridgeError::Timeout(_) => {
                AuthError::Network(error.to_string())
            }
            BridgeError::Storage(message) => AuthError::Storage(message),
            other => AuthError::Network(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
