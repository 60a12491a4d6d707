//! Access token payload decoding.
//!
//! The payload segment is read without verifying the signature. The client
//! only uses it to label the session; the backend remains the authority.

use crate::error::{AuthError, Result};
use crate::types::UserInfo;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
    #[default]
    None,
}

impl OneOrMany {
    fn values(&self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => value
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            OneOrMany::Many(values) => values.clone(),
            OneOrMany::None => Vec::new(),
        }
    }
}

/// Claims read from the access token payload.
#[derive(Debug, Default, Deserialize)]
pub struct AccessClaims {
    #[serde(default)]
    sub: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default, alias = "preferred_username")]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default, alias = "fullName", alias = "name")]
    full_name: Option<String>,
    #[serde(default)]
    roles: OneOrMany,
    #[serde(default)]
    role: OneOrMany,
    /// Expiry (Unix seconds), when present.
    #[serde(default)]
    pub exp: Option<i64>,
}

impl AccessClaims {
    /// Decode the payload segment of a JWT.
    pub fn decode(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        let [_, payload, _] = segments.as_slice() else {
            return Err(AuthError::TokenCorrupted(
                "access token is not a JWT".to_string(),
            ));
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| AuthError::TokenCorrupted(format!("invalid payload encoding: {}", e)))?;

        serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::TokenCorrupted(format!("invalid payload: {}", e)))
    }

    /// Build the user identity. `fallback_username` is used when the token
    /// carries no username claim.
    pub fn user_info(&self, fallback_username: Option<&str>) -> Result<UserInfo> {
        let id = self
            .id
            .as_ref()
            .or(self.sub.as_ref())
            .and_then(value_to_string);

        let username = self
            .username
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| fallback_username.map(str::to_string))
            .or_else(|| self.sub.as_ref().and_then(value_to_string));

        let Some(username) = username else {
            return Err(AuthError::TokenCorrupted(
                "access token does not identify a user".to_string(),
            ));
        };

        Ok(UserInfo {
            id: id.unwrap_or_else(|| username.clone()),
            username,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
        })
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.roles
            .values()
            .into_iter()
            .chain(self.role.values())
            .collect()
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{}.{}.signature", header, body)
}
