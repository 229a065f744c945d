//! Token store: persistent key/value storage for the auth token.
//!
//! DESIGN
//! ======
//! Implementors provide `read`, `set`, and `remove`. Callers go through
//! [`TokenStore::get`], which collapses every read outcome into a plain
//! `Option<String>`: a missing key, an empty value, and a failed read all
//! come back as `None`. Read failures are logged here and never reach the
//! session layer.
//!
//! `FileTokenStore` keeps a single JSON object on disk. Writes go to a temp
//! file in the same directory which is synced and then renamed over the
//! target, so a crash mid-write leaves the previous value intact.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ErrorCode;

/// Key under which the auth token is persisted.
pub const AUTH_TOKEN_KEY: &str = "authToken";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage encode failed: {0}")]
    Encode(serde_json::Error),
    #[error("storage decode failed: {0}")]
    Decode(serde_json::Error),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_STORAGE_IO",
            Self::Encode(_) => "E_STORAGE_ENCODE",
            Self::Decode(_) => "E_STORAGE_DECODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

// =============================================================================
// TRAIT
// =============================================================================

/// Persistent store for a small number of secret strings.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    /// Raw read. `Ok(None)` means the key is not present.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing storage cannot be read.
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Durably replace any prior value for `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the value could not be written.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the backing storage could not be updated.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Fail-closed read: any failure is logged and reported as absent.
    async fn get(&self, key: &str) -> Option<String> {
        match self.read(key).await {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, code = e.error_code(), error = %e, "token store read failed; treating as absent");
                None
            }
        }
    }
}

// =============================================================================
// FILE STORE
// =============================================================================

/// JSON-file backed store with atomic replace-on-write.
pub struct FileTokenStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: tokio::sync::Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(StorageError::Decode),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Load for a write. A corrupt file is replaced rather than blocking writes.
    async fn load_for_write(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match self.load().await {
            Err(StorageError::Decode(e)) => {
                warn!(path = %self.path.display(), error = %e, "discarding corrupt token store");
                Ok(BTreeMap::new())
            }
            other => other,
        }
    }

    async fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(entries).map_err(StorageError::Encode)?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "store".to_owned(), |n| n.to_string_lossy().into_owned());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::Io(e));
        }
        debug!(path = %self.path.display(), entries = entries.len(), "token store written");
        Ok(())
    }
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.load().await?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load_for_write().await?;
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load_for_write().await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&entries).await
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-process store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded store, as if a previous run had persisted `value`.
    #[must_use]
    pub fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::new();
        store
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        store
    }

    /// Synchronous peek used by callers that only need to inspect state.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.snapshot(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
