//! Local fallback key/value store.
//!
//! SYSTEM CONTEXT
//! ==============
//! The dashboard keeps a small amount of state on the device under fixed
//! keys (`token`, `social_profiles`) with JSON-encoded values. `LocalStore`
//! abstracts that persistence so the profile store can run against a file on
//! disk in the CLI and against memory in tests.
//!
//! DESIGN
//! ======
//! `FileStore` keeps every key in one JSON document and replaces it with a
//! write-to-temp-then-rename, so a crash mid-write leaves the previous
//! document intact. Reads go to disk each time; the file is tiny.

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Key holding the bearer token of a signed-in user.
pub const TOKEN_KEY: &str = "token";
/// Key holding the JSON-encoded social profile record.
pub const SOCIAL_PROFILES_KEY: &str = "social_profiles";

const STORE_FILE_NAME: &str = "store.json";
const CORRUPT_EXTENSION: &str = "json.corrupt";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("local store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("local store JSON failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("local store lock poisoned")]
    Poisoned,
    #[error("local store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// String key/value persistence with `localStorage` semantics.
pub trait LocalStore: Send + Sync {
    /// Read the raw value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be written.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backing storage cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Load a JSON value stored under `key`.
///
/// # Errors
///
/// Returns [`StoreError::Json`] if the stored value does not decode as `T`.
pub fn load_json<T: DeserializeOwned>(store: &dyn LocalStore, key: &str) -> Result<Option<T>, StoreError> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Save `value` JSON-encoded under `key`.
///
/// # Errors
///
/// Returns [`StoreError`] if encoding or the underlying write fails.
pub fn save_json<T: Serialize + ?Sized>(store: &dyn LocalStore, key: &str, value: &T) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Process-local store. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// Store persisted as a single JSON document under a data directory.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open (creating if needed) the store under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE_NAME);
        debug!(path = %path.display(), "opened local store");
        Ok(Self { path, write_lock: Mutex::new(()) })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Like `read_all`, but an undecodable document is moved aside to
    /// `store.json.corrupt` so the pending write can start from empty.
    fn read_for_update(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match self.read_all() {
            Err(StoreError::Json(error)) => {
                let quarantine = self.path.with_extension(CORRUPT_EXTENSION);
                warn!(
                    %error,
                    path = %self.path.display(),
                    quarantine = %quarantine.display(),
                    "local store unreadable; moving it aside"
                );
                fs::rename(&self.path, &quarantine)?;
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    fn update<F>(&self, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let mut entries = self.read_for_update()?;
        apply(&mut entries);
        self.write_all(&entries)
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.remove(key);
        })
    }
}
