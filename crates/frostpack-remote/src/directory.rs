//! Directory-backed archival tier with simulated thaw latency.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::{RemoteBackend, RemoteError, RestoreRequestOutcome, RestoreStatus, Result};

/// Archival tier rooted at a local directory.
///
/// Objects are plain files under the root, keyed by their relative path.
/// With a zero thaw delay the backend behaves like warm storage; with a
/// non-zero delay a fetch only succeeds after a restore was requested and
/// the delay has elapsed, matching cold-tier semantics.
pub struct DirectoryBackend {
    root: PathBuf,
    thaw_delay: Duration,
    restores: Mutex<HashMap<String, Instant>>,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryBackend {
            root: root.into(),
            thaw_delay: Duration::ZERO,
            restores: Mutex::new(HashMap::new()),
        }
    }

    /// Cold-tier variant: fetches require a completed restore.
    pub fn with_thaw_delay(root: impl Into<PathBuf>, thaw_delay: Duration) -> Self {
        DirectoryBackend {
            root: root.into(),
            thaw_delay,
            restores: Mutex::new(HashMap::new()),
        }
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn is_warm(&self, key: &str) -> bool {
        if self.thaw_delay.is_zero() {
            return true;
        }
        let restores = self.restores.lock().unwrap_or_else(|e| e.into_inner());
        restores
            .get(key)
            .is_some_and(|ready_at| Instant::now() >= *ready_at)
    }
}

impl RemoteBackend for DirectoryBackend {
    fn put(&self, local: &Path, key: &str) -> Result<()> {
        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, &dest)?;
        debug!(key, "stored object");
        Ok(())
    }

    fn fetch(&self, key: &str, dest: &Path) -> Result<()> {
        let source = self.object_path(key);
        if !source.is_file() {
            return Err(RemoteError::KeyNotFound(key.to_string()));
        }
        if !self.is_warm(key) {
            return Err(RemoteError::NotRestored(key.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, dest)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.object_path(key).is_file())
    }

    fn restore(&self, key: &str) -> Result<RestoreRequestOutcome> {
        if !self.object_path(key).is_file() {
            return Err(RemoteError::KeyNotFound(key.to_string()));
        }
        if self.thaw_delay.is_zero() {
            return Ok(RestoreRequestOutcome::AlreadyAvailable);
        }
        let mut restores = self.restores.lock().unwrap_or_else(|e| e.into_inner());
        match restores.get(key) {
            Some(ready_at) if Instant::now() >= *ready_at => {
                Ok(RestoreRequestOutcome::AlreadyAvailable)
            }
            Some(_) => Ok(RestoreRequestOutcome::Accepted),
            None => {
                restores.insert(key.to_string(), Instant::now() + self.thaw_delay);
                debug!(key, delay = ?self.thaw_delay, "restore accepted");
                Ok(RestoreRequestOutcome::Accepted)
            }
        }
    }

    fn restore_status(&self, key: &str) -> Result<RestoreStatus> {
        if !self.object_path(key).is_file() {
            return Err(RemoteError::KeyNotFound(key.to_string()));
        }
        if self.thaw_delay.is_zero() {
            return Ok(RestoreStatus::Available);
        }
        let restores = self.restores.lock().unwrap_or_else(|e| e.into_inner());
        match restores.get(key) {
            Some(ready_at) if Instant::now() >= *ready_at => Ok(RestoreStatus::Available),
            Some(_) => Ok(RestoreStatus::Pending),
            None => Ok(RestoreStatus::NotAvailable),
        }
    }

    fn entry_url(&self, key: &str) -> String {
        format!("file://{}", self.object_path(key).display())
    }
}
