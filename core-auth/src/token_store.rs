//! Durable Token Storage
//!
//! Persists the issued [`TokenPair`] across restarts through the host
//! [`SecureStore`] bridge.
//!
//! ## Layout
//!
//! Two keys, one per token. Each value is a small JSON document holding the
//! token and its expiry:
//!
//! ```text
//! wms.access_token   {"token":"eyJ...","expires_at":"2024-06-01T10:00:00Z"}
//! wms.refresh_token  {"token":"eyJ...","expires_at":"2024-06-08T10:00:00Z"}
//! ```
//!
//! ## Guarantees
//!
//! - `save`, `load` and `clear` are serialized by an internal lock, so a reader
//!   never observes one key from an old pair and the other from a new one.
//! - A half-present pair is never returned: if only one key is found, both are
//!   removed and `load` reports nothing stored.
//! - Corrupted values are removed and reported as [`AuthError::TokenCorrupted`].
//! - Token values are never logged.

use crate::error::{AuthError, Result};
use crate::types::TokenPair;
use bridge_traits::storage::SecureStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const ACCESS_TOKEN_KEY: &str = "wms.access_token";
pub const REFRESH_TOKEN_KEY: &str = "wms.refresh_token";

#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Persistence for the issued token pair.
///
/// Cheap to clone; clones share the underlying store and lock.
#[derive(Clone)]
pub struct TokenStore {
    secure_store: Arc<dyn SecureStore>,
    lock: Arc<Mutex<()>>,
}

impl TokenStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing TokenStore");
        Self {
            secure_store,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Replace any stored pair with `pair`.
    ///
    /// If the second write fails the first one is rolled back, leaving nothing
    /// stored rather than a mixed pair.
    pub async fn save(&self, pair: &TokenPair) -> Result<()> {
        let _guard = self.lock.lock().await;

        let access = encode(pair.access_token(), pair.access_expires_at())?;
        let refresh = encode(pair.refresh_token(), pair.refresh_expires_at())?;

        self.secure_store
            .set_secret(REFRESH_TOKEN_KEY, &refresh)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store refresh token");
                AuthError::Storage(e.to_string())
            })?;

        if let Err(e) = self.secure_store.set_secret(ACCESS_TOKEN_KEY, &access).await {
            warn!(error = %e, "Failed to store access token, rolling back");
            self.remove_all().await;
            return Err(AuthError::Storage(e.to_string()));
        }

        info!(
            access_expires_at = %pair.access_expires_at(),
            refresh_expires_at = %pair.refresh_expires_at(),
            "Tokens stored"
        );
        Ok(())
    }

    /// Return the stored pair, or `None` if nothing (or only half a pair) is stored.
    pub async fn load(&self) -> Result<Option<TokenPair>> {
        let _guard = self.lock.lock().await;

        let access = self.read(ACCESS_TOKEN_KEY).await?;
        let refresh = self.read(REFRESH_TOKEN_KEY).await?;

        let (access, refresh) = match (access, refresh) {
            (None, None) => {
                debug!("No tokens found in storage");
                return Ok(None);
            }
            (Some(access), Some(refresh)) => (access, refresh),
            (access, _) => {
                warn!(
                    has_access_token = access.is_some(),
                    "Found an incomplete token pair, clearing it"
                );
                self.remove_all().await;
                return Ok(None);
            }
        };

        let pair = decode(&access)
            .and_then(|access| decode(&refresh).map(|refresh| (access, refresh)))
            .and_then(|(access, refresh)| {
                TokenPair::new(
                    access.token,
                    refresh.token,
                    access.expires_at,
                    refresh.expires_at,
                )
                .map_err(|e| AuthError::TokenCorrupted(e.to_string()))
            });

        match pair {
            Ok(pair) => {
                debug!(
                    access_expires_at = %pair.access_expires_at(),
                    "Tokens loaded"
                );
                Ok(Some(pair))
            }
            Err(e) => {
                warn!(error = %e, "Stored tokens are corrupted, clearing them");
                self.remove_all().await;
                Err(e)
            }
        }
    }

    /// Remove both tokens. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().await;

        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            self.secure_store.delete_secret(key).await.map_err(|e| {
                warn!(key, error = %e, "Failed to delete token");
                AuthError::Storage(e.to_string())
            })?;
        }

        info!("Tokens cleared");
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.secure_store.get_secret(key).await.map_err(|e| {
            warn!(key, error = %e, "Failed to read token from secure storage");
            AuthError::Storage(e.to_string())
        })
    }

    async fn remove_all(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.secure_store.delete_secret(key).await {
                warn!(key, error = %e, "Failed to delete token data");
            }
        }
    }
}

fn encode(token: &str, expires_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let stored = StoredToken {
        token: token.to_string(),
        expires_at,
    };
    serde_json::to_vec(&stored)
        .map_err(|e| AuthError::Storage(format!("Failed to serialize token: {}", e)))
}

fn decode(data: &[u8]) -> Result<StoredToken> {
    serde_json::from_slice(data).map_err(|e| AuthError::TokenCorrupted(e.to_string()))
}
