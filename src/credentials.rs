//! The API key used by the privileged side.
//!
//! Only the request router holds a [`Credentials`]; pages never see the key.

use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::error::StorageError;
use crate::storage::KeyValueStore;

/// Key under which the API key is persisted.
pub const API_KEY_STORAGE_KEY: &str = "gemini_api_key";
/// Used when nothing has been saved yet.
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

#[derive(Clone)]
pub struct Credentials {
    store: Arc<dyn KeyValueStore>,
    api_key: Arc<RwLock<Option<String>>>,
}

impl Credentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            api_key: Arc::new(RwLock::new(None)),
        }
    }

    /// Reads the persisted key into memory, falling back to the environment.
    pub async fn load(&self) -> Result<(), StorageError> {
        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.get(API_KEY_STORAGE_KEY))
            .await
            .map_err(|e| StorageError::Other(e.to_string()))??;

        let key = non_empty(stored).or_else(|| non_empty(std::env::var(API_KEY_ENV_VAR).ok()));
        match &key {
            Some(_) => info!("API key loaded"),
            None => warn!("no API key configured"),
        }
        self.replace(key);
        Ok(())
    }

    /// Persists a new key, then makes it the active one.
    pub async fn save(&self, api_key: String) -> Result<(), StorageError> {
        let store = self.store.clone();
        let value = api_key.clone();
        tokio::task::spawn_blocking(move || store.set(API_KEY_STORAGE_KEY, &value))
            .await
            .map_err(|e| StorageError::Other(e.to_string()))??;

        self.replace(non_empty(Some(api_key)));
        info!("API key saved");
        Ok(())
    }

    /// The cached key. Never touches storage.
    pub fn current(&self) -> Option<String> {
        self.api_key.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forgets the in-memory key. Persisted state is left alone.
    pub fn teardown(&self) {
        self.replace(None);
    }

    fn replace(&self, key: Option<String>) {
        *self.api_key.write().unwrap_or_else(|e| e.into_inner()) = key;
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
