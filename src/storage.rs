use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::config::get_user_config_path;
use crate::error::StorageError;

/// Durable key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Stores values as top-level string entries of a TOML file, leaving any
/// other settings in the file untouched.
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The store backed by the user's config file.
    pub fn user() -> Result<Self, StorageError> {
        get_user_config_path().map(Self::new).ok_or(StorageError::NoHome)
    }

    fn read_table(&self) -> Result<toml::Table, StorageError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(content.parse::<toml::Table>()?)
    }
}

impl KeyValueStore for TomlFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let table = self.read_table()?;
        Ok(table.get(key).and_then(|v| v.as_str()).map(str::to_string))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut doc = self.read_table()?;
        doc.insert(key.to_string(), toml::Value::String(value.to_string()));

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, doc.to_string())?;
        Ok(())
    }
}

/// In-process store, for tests and for running without a config directory.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(key: &str, value: &str) -> Self {
        let store = Self::default();
        store
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        store
    }

    /// A store that rejects every write.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::Other("storage is read-only".to_string()));
        }
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_store_round_trips_and_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("whatsthis.toml");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "gemini_model = \"gemini-1.5-flash\"\n").unwrap();

        let store = TomlFileStore::new(path.clone());
        assert_eq!(store.get("gemini_api_key").unwrap(), None);

        store.set("gemini_api_key", "secret").unwrap();
        assert_eq!(store.get("gemini_api_key").unwrap().as_deref(), Some("secret"));

        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("gemini_model"));
    }

    #[test]
    fn toml_store_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b.toml");
        let store = TomlFileStore::new(path.clone());
        store.set("gemini_api_key", "k").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn toml_store_reports_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let store = TomlFileStore::new(path);
        assert!(matches!(store.get("gemini_api_key"), Err(StorageError::Parse(_))));
    }

    #[test]
    fn read_only_memory_store_rejects_writes() {
        let store = MemoryStore::read_only();
        assert!(store.set("k", "v").is_err());
        assert_eq!(store.get("k").unwrap(), None);
    }
}
