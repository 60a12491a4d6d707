//! Error types for the warehouse API

use crate::types::{ApiEnvelope, FieldError};
use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpResponse;
use core_runtime::events::EventSeverity;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The credential was refused even after the authorizer's refresh attempt.
    #[error("Authorization expired")]
    AuthorizationExpired,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Other 4xx, or a 2xx envelope with `success: false`.
    #[error("Request rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
        field_errors: Vec<FieldError>,
    },

    #[error("Server error (status {status})")]
    Server { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ApiError {
    /// Classify a non-2xx response. The body is read as an envelope when
    /// possible to keep the backend's message and field errors.
    pub fn from_response(response: &HttpResponse) -> Self {
        let envelope = response.json::<ApiEnvelope<serde_json::Value>>().ok();
        let message = envelope
            .as_ref()
            .and_then(|e| e.message.clone())
            .unwrap_or_default();

        match response.status {
            401 => ApiError::AuthorizationExpired,
            403 => ApiError::PermissionDenied(message),
            404 => ApiError::NotFound(message),
            status @ 400..=499 => {
                let (code, field_errors) = envelope
                    .map(|e| (e.error_code, e.field_errors))
                    .unwrap_or_default();
                ApiError::Rejected {
                    status,
                    code,
                    message,
                    field_errors,
                }
            }
            status @ 500..=599 => ApiError::Server { status },
            status => ApiError::InvalidResponse(format!("unexpected status {}", status)),
        }
    }

    /// Message suitable for showing to the end user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::AuthorizationExpired => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ApiError::PermissionDenied(_) => {
                "You do not have permission to perform this action.".to_string()
            }
            ApiError::NotFound(message) if !message.is_empty() => message.clone(),
            ApiError::NotFound(_) => "The requested item was not found.".to_string(),
            ApiError::Rejected { message, .. } if !message.trim().is_empty() => message.clone(),
            ApiError::Rejected { .. } => "The request was rejected.".to_string(),
            ApiError::Server { .. } => {
                "The server encountered an error. Please try again later.".to_string()
            }
            ApiError::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ApiError::InvalidResponse(_) => {
                "The server returned an unexpected response.".to_string()
            }
            ApiError::Config(_) => "The application is not configured correctly.".to_string(),
        }
    }

    /// Severity of the user-facing notification, or `None` when the session
    /// layer already reports it.
    pub fn notification_severity(&self) -> Option<EventSeverity> {
        match self {
            ApiError::AuthorizationExpired => None,
            ApiError::NotFound(_) | ApiError::Rejected { .. } => Some(EventSeverity::Warning),
            _ => Some(EventSeverity::Error),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(error: BridgeError) -> Self {
        ApiError::Network(error.to_string())
    }
}

impl From<core_runtime::Error> for ApiError {
    fn from(error: core_runtime::Error) -> Self {
        ApiError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
