//! In-memory `SecureStore`
//!
//! Nothing survives the process. Used for tests and "do not remember me"
//! sessions.

use async_trait::async_trait;
use bridge_traits::{error::Result, storage::SecureStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
pub struct MemorySecureStore {
    storage: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub async fn len(&self) -> usize {
        self.storage.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.storage.lock().await.is_empty()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut storage = self.storage.lock().await;
        storage.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let storage = self.storage.lock().await;
        Ok(storage.get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        let mut storage = self.storage.lock().await;
        storage.remove(key);
        Ok(())
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        let storage = self.storage.lock().await;
        Ok(storage.contains_key(key))
    }
}
