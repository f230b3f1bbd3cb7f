//! Durable storage owned by counters.
//!
//! Each counter persists exactly one value, its timestamp list, under its own
//! key. Storage implementations only need to be correct for a single writer
//! per key; the namespace guarantees there is never more than one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::error::{LimiterError, Result};
use crate::ratelimit::WindowLog;

/// Persistent home of each counter's timestamp list.
#[async_trait]
pub trait DurableStorage: Send + Sync + 'static {
    /// Read the stored list for `key`, `None` if nothing was ever stored.
    async fn get(&self, key: &str) -> Result<Option<WindowLog>>;

    /// Replace the stored list for `key`. Either the whole list is written or nothing is.
    async fn put(&self, key: &str, log: &WindowLog) -> Result<()>;

    /// Delete the stored list for `key`, returning whether one existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// Shared handle to a storage implementation.
pub type SharedStorage = Arc<dyn DurableStorage>;

/// In-process storage. Survives counter hibernation, not process restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, WindowLog>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a stored list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<WindowLog>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, log: &WindowLog) -> Result<()> {
        self.entries.insert(key.to_string(), log.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Name of the file locked by the storage that owns a directory.
const LOCK_FILE: &str = ".lock";

/// Storage backed by one JSON file per key in a directory.
///
/// Files are named after the SHA-256 of the key and replaced atomically by
/// writing a sibling temp file and renaming it over the original. The
/// directory is owned exclusively: while any clone of this storage is alive,
/// opening the same directory again, from this process or another, fails.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    _lock: Arc<std::fs::File>,
}

impl FileStorage {
    /// Use `dir` for counter files, creating it if needed.
    ///
    /// Fails with `StoreUnavailable` if another storage already owns `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let lock = lock_dir(&dir)?;

        debug!(dir = %dir.display(), "Opened counter directory");
        Ok(Self {
            dir,
            _lock: Arc::new(lock),
        })
    }

    /// The directory holding counter files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{:x}.timestamps.json", hasher.finalize()))
    }
}

/// Take an exclusive advisory lock on `dir`, held until the returned file is closed.
fn lock_dir(dir: &Path) -> Result<std::fs::File> {
    let path = dir.join(LOCK_FILE);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)?;

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;

        // SAFETY: the descriptor belongs to `file`, which is open for the whole call
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(LimiterError::unavailable(format!(
                    "{} is already owned by another counter namespace",
                    dir.display()
                )));
            }
            return Err(LimiterError::unavailable(format!("lock {}: {}", path.display(), err)));
        }
    }

    Ok(file)
}

#[async_trait]
impl DurableStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<WindowLog>> {
        let path = self.path_for(key);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LimiterError::unavailable(format!("read {}: {}", path.display(), e))),
        };

        let log = serde_json::from_slice(&contents)
            .map_err(|e| LimiterError::unavailable(format!("decode {}: {}", path.display(), e)))?;
        Ok(Some(log))
    }

    async fn put(&self, key: &str, log: &WindowLog) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec(log).map_err(LimiterError::unavailable)?;

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| LimiterError::unavailable(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| LimiterError::unavailable(format!("rename {}: {}", path.display(), e)))?;

        trace!(key = %key, path = %path.display(), events = log.len(), "Persisted counter");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LimiterError::unavailable(format!("delete {}: {}", path.display(), e))),
        }
    }
}
