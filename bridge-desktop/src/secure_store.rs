//! `SecureStore` over the OS credential vault
//!
//! Each key becomes one credential under the store's service name:
//! macOS Keychain, Windows Credential Manager, Secret Service on Linux.
//! Vault calls block (D-Bus, XPC), so they run on the blocking pool.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

const DEFAULT_SERVICE_NAME: &str = "warehouse-client";

#[derive(Debug, Clone)]
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    /// Separate service names keep environments (staging, production)
    /// from reading each other's tokens.
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Run `op` against the vault entry for `key` on the blocking pool.
    async fn with_entry<T, F>(&self, key: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> std::result::Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service_name.clone();
        let account = key.to_string();

        spawn_blocking(move || Entry::new(&service, &account).and_then(op))
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Keyring task failed: {}", e)))?
            .map_err(map_keyring_error)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

fn map_keyring_error(e: keyring::Error) -> BridgeError {
    match e {
        keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
            BridgeError::NotAvailable(format!("Credential vault unavailable: {}", e))
        }
        other => BridgeError::Storage(format!("Keyring error: {}", other)),
    }
}

/// Vault entries hold text; values are stored base64-encoded.
fn decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|e| BridgeError::Storage(format!("Stored secret is not valid base64: {}", e)))
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(value);
        self.with_entry(key, move |entry| entry.set_password(&encoded))
            .await?;

        debug!(key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let stored = self
            .with_entry(key, |entry| match entry.get_password() {
                Ok(encoded) => Ok(Some(encoded)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(e),
            })
            .await?;

        match stored {
            Some(encoded) => decode(&encoded).map(Some).inspect_err(|e| {
                warn!(key, error = %e, "Unreadable secret in keyring");
            }),
            None => Ok(None),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let existed = self
            .with_entry(key, |entry| match entry.delete_credential() {
                Ok(()) => Ok(true),
                Err(keyring::Error::NoEntry) => Ok(false),
                Err(e) => Err(e),
            })
            .await?;

        debug!(key, existed, "Deleted secret from keyring");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name() {
        assert_eq!(KeyringSecureStore::new().service_name(), "warehouse-client");
        assert_eq!(
            KeyringSecureStore::with_service_name("wms-staging").service_name(),
            "wms-staging"
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode(&STANDARD.encode(b"{}")).unwrap(), b"{}".to_vec());
        assert!(matches!(decode("%%%"), Err(BridgeError::Storage(_))));
    }

    #[tokio::test]
    async fn test_round_trip_when_vault_available() {
        // Headless CI machines usually have no vault; treat that as a skip.
        let store = KeyringSecureStore::with_service_name("wms-client-test");
        let key = "wms.test.refresh_token";

        if let Err(e) = store.set_secret(key, b"rt-123").await {
            println!("Keyring not available ({}), skipping test", e);
            return;
        }
        match store.get_secret(key).await.unwrap() {
            Some(value) => assert_eq!(value, b"rt-123".to_vec()),
            // Builds without a native backend get keyring's non-persistent mock.
            None => return,
        }

        store.delete_secret(key).await.unwrap();
        store.delete_secret(key).await.unwrap();
        assert_eq!(store.get_secret(key).await.unwrap(), None);
    }
}
