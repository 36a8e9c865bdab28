//! Durable client-side storage for session data.
//!
//! The store writes two string values, the serialized token pair and the
//! serialized user profile, plus the `user_role` cookie. Backends only move
//! strings around; (de)serialization happens in the session store.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// Storage key for the serialized `TokenPair`
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the serialized `UserProfile`
pub const USER_INFO_KEY: &str = "userInfo";

/// Cookie carrying the signed-in user's role
pub const USER_ROLE_COOKIE: &str = "user_role";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// A cookie as the web front end would set it through `document.cookie`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
        }
    }

    /// `name=<percent-encoded value>; path=<path>`
    pub fn header_value(&self) -> String {
        format!(
            "{}={}; path={}",
            self.name,
            urlencoding::encode(&self.value),
            self.path
        )
    }
}

fn cookie_key(name: &str) -> String {
    format!("cookie:{}", name)
}

/// Key-value storage that outlives the process.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn set_cookie(&self, cookie: &Cookie) -> Result<(), StorageError> {
        self.set(&cookie_key(&cookie.name), &cookie.header_value())
    }

    /// The stored `name=value; path=...` string of a cookie.
    fn cookie(&self, name: &str) -> Result<Option<String>, StorageError> {
        self.get(&cookie_key(name))
    }

    fn remove_cookie(&self, name: &str) -> Result<(), StorageError> {
        self.remove(&cookie_key(name))
    }
}

/// In-process storage. Nothing survives a restart; used for tests and for
/// sessions that must not touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Storage persisted as a single JSON object in `<dir>/session.json`.
pub struct FileStorage {
    cache_dir: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }

    fn read_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Like `read_entries`, but a corrupt file is discarded so writes can
    /// recover from it.
    fn read_entries_for_update(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.read_entries() {
            Err(StorageError::Corrupt(e)) => {
                warn!(error = %e, path = ?self.session_path(), "Discarding corrupt session file");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let path = self.session_path();
        if entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            return Ok(());
        }

        std::fs::create_dir_all(&self.cache_dir)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = ?path, keys = entries.len(), "Session file written");
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_entries()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries_for_update()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_entries(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_entries_for_update()?;
        if entries.remove(key).is_some() || entries.is_empty() {
            self.write_entries(&entries)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_value_is_percent_encoded() {
        let cookie = Cookie::new(USER_ROLE_COOKIE, "Plant Manager/HR");
        assert_eq!(
            cookie.header_value(),
            "user_role=Plant%20Manager%2FHR; path=/"
        );
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        storage.set(ACCESS_TOKEN_KEY, "{}").expect("set");
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).expect("get").as_deref(), Some("{}"));

        storage.remove(ACCESS_TOKEN_KEY).expect("remove");
        storage.remove(ACCESS_TOKEN_KEY).expect("second remove is fine");
        assert!(storage.is_empty());
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().join("greenfuel"));

        storage.set(ACCESS_TOKEN_KEY, r#"{"access":"X","refresh":"Y"}"#).expect("set");
        storage.set_cookie(&Cookie::new(USER_ROLE_COOKIE, "admin")).expect("cookie");

        let reopened = FileStorage::new(dir.path().join("greenfuel"));
        assert_eq!(
            reopened.get(ACCESS_TOKEN_KEY).expect("get").as_deref(),
            Some(r#"{"access":"X","refresh":"Y"}"#)
        );
        assert_eq!(
            reopened.cookie(USER_ROLE_COOKIE).expect("cookie").as_deref(),
            Some("user_role=admin; path=/")
        );
    }

    #[test]
    fn test_file_storage_removes_file_when_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::new(dir.path().to_path_buf());

        storage.set(USER_INFO_KEY, "{}").expect("set");
        assert!(dir.path().join(SESSION_FILE).exists());

        storage.remove(USER_INFO_KEY).expect("remove");
        assert!(!dir.path().join(SESSION_FILE).exists());
        assert_eq!(storage.get(USER_INFO_KEY).expect("get"), None);
    }

    #[test]
    fn test_file_storage_recovers_from_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").expect("write");
        let storage = FileStorage::new(dir.path().to_path_buf());

        assert!(matches!(storage.get(ACCESS_TOKEN_KEY), Err(StorageError::Corrupt(_))));

        storage.set(ACCESS_TOKEN_KEY, "value").expect("set over corrupt file");
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).expect("get").as_deref(), Some("value"));
    }
}
