//! Key-value storage medium behind the session store.
//!
//! This module provides:
//! - A size-constrained `StorageBackend` trait
//! - File-based storage for native builds
//! - In-memory storage for tests and demo runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

/// Default byte budget, matching what browsers give a single origin.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded: {needed} bytes needed, limit is {limit}")]
    QuotaExceeded { needed: u64, limit: u64 },

    #[error("storage I/O failed: {0}")]
    Io(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;
}

// ============================================
// In-memory backend
// ============================================

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.lock();
        if let Some(limit) = self.quota {
            let others: u64 = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            let needed = others + (key.len() + value.len()) as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

// ============================================
// File backend
// ============================================

/// One `<key>.json` file per key under a root directory.
pub struct FileStorage {
    root: PathBuf,
    quota: Option<u64>,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>, quota: Option<u64>) -> Self {
        Self {
            root: root.into(),
            quota,
        }
    }

    /// Storage under the platform's local data directory.
    pub fn in_data_dir(quota: Option<u64>) -> Self {
        Self::new(default_storage_dir(), quota)
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(key)))
    }

    async fn used_bytes_excluding(&self, excluded: &PathBuf) -> StorageResult<u64> {
        let mut total = 0;
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if &path == excluded {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                total += entry.metadata().await?.len();
            }
        }
        Ok(total)
    }
}

pub fn default_storage_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join("lyceum").join("storage");
    }

    PathBuf::from("cache").join("storage")
}

#[async_trait]
impl StorageBackend for FileStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key);
        if let Some(limit) = self.quota {
            let needed = self.used_bytes_excluding(&path).await? + value.len() as u64;
            if needed > limit {
                return Err(StorageError::QuotaExceeded { needed, limit });
            }
        }
        fs::create_dir_all(&self.root).await.map_err(|e| {
            StorageError::Unavailable(format!("failed to create storage directory: {e}"))
        })?;
        fs::write(path, value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Sanitize a storage key for filesystem use.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect()
}
