//! Retrieval of stored files: from the open workspace, the restore cache,
//! or the cold tier after an asynchronous restore.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use frostpack_archive::extract_entry;
use frostpack_config::Config;
use frostpack_lock::WaitingLock;
use frostpack_remote::{RemoteBackend, RestoreRequestOutcome, RestoreStatus};

use crate::error::{EngineError, Result};
use crate::progress::RestorationProgress;
use crate::request::RetrieveRequest;
use crate::workspace::{remote_key, SmallFileRef, Workspace};

/// Which retrieval path a request takes; chosen once by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveVariant {
    /// The file still sits in its building directory on this node.
    LocalSmallFile,
    /// The file must come from a cached or restored archive.
    CacheSmallFile,
    /// A file stored directly, outside any archive.
    BigFile,
}

/// Caller must hold the STORE lock on the node for local retrieval, or the
/// RESTORE lock on the archive for the two cache variants, keeping the given
/// [`WaitingLock`] alive across the whole restore wait.
pub struct RetrieveTask<'a> {
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub remote: &'a dyn RemoteBackend,
}

impl RetrieveTask<'_> {
    pub fn run(
        &self,
        request: &RetrieveRequest,
        variant: RetrieveVariant,
        waiting: &mut WaitingLock<'_>,
        progress: &dyn RestorationProgress,
    ) {
        let outcome = match variant {
            RetrieveVariant::LocalSmallFile => self.retrieve_local(request),
            RetrieveVariant::CacheSmallFile => self.retrieve_cached_small(request, waiting),
            RetrieveVariant::BigFile => self.retrieve_big(request, waiting),
        };
        match outcome {
            Ok(local) => progress.restored(request, &local),
            Err(e) => {
                warn!(key = request.key, error = %e, "retrieve failed");
                progress.restore_failed(request, &e.to_string());
            }
        }
    }

    fn retrieve_local(&self, request: &RetrieveRequest) -> Result<PathBuf> {
        let reference = SmallFileRef::parse(&request.key)?;
        let source = self
            .workspace
            .find_small_file(&reference)
            .ok_or_else(|| EngineError::NotFoundLocally(request.key.clone()))?;
        copy_to_destination(&source, &request.destination)?;
        debug!(key = request.key, "retrieved from build workspace");
        Ok(request.destination.clone())
    }

    fn retrieve_cached_small(
        &self,
        request: &RetrieveRequest,
        waiting: &mut WaitingLock<'_>,
    ) -> Result<PathBuf> {
        let reference = SmallFileRef::parse(&request.key)?;
        let file_name = reference
            .file_name
            .clone()
            .ok_or_else(|| EngineError::MalformedKey(request.key.clone()))?;
        let cache_node = self.workspace.cache_node_dir(&reference.node);
        let extracted_dir = cache_node.join(reference.closed_dir_name());
        let extracted = extracted_dir.join(&file_name);

        if extracted.is_file() {
            copy_to_destination(&extracted, &request.destination)?;
            debug!(key = request.key, "cache hit on extracted file");
            return Ok(request.destination.clone());
        }

        let cached_archive = cache_node.join(&reference.archive_name);
        if !cached_archive.is_file() {
            let archive_key =
                remote_key(&self.config.storage.root_path, &reference.archive_rel());
            self.restore_to_cache(&archive_key, &cached_archive, waiting)?;
        }

        let entry = extract_entry(&cached_archive, &file_name, &extracted_dir)?;
        copy_to_destination(&entry, &request.destination)?;
        info!(key = request.key, "retrieved from restored archive");
        Ok(request.destination.clone())
    }

    fn retrieve_big(
        &self,
        request: &RetrieveRequest,
        waiting: &mut WaitingLock<'_>,
    ) -> Result<PathBuf> {
        let cached = self.workspace.cache_root().join(&request.key);
        if !cached.is_file() {
            let key = remote_key(&self.config.storage.root_path, &request.key);
            self.restore_to_cache(&key, &cached, waiting)?;
        }
        copy_to_destination(&cached, &request.destination)?;
        info!(key = request.key, "retrieved big file");
        Ok(request.destination.clone())
    }

    /// Restore a cold object and download it to `dest`, polling with
    /// exponential backoff and renewing the held lock while waiting.
    pub(crate) fn restore_to_cache(
        &self,
        key: &str,
        dest: &Path,
        waiting: &mut WaitingLock<'_>,
    ) -> Result<()> {
        match self.remote.restore(key) {
            Ok(RestoreRequestOutcome::AlreadyAvailable) => {}
            Ok(RestoreRequestOutcome::Accepted) => self.poll_until_available(key, waiting)?,
            Ok(RestoreRequestOutcome::KeyNotFound) => {
                return Err(EngineError::RemoteKeyMissing(key.to_string()))
            }
            Err(frostpack_remote::RemoteError::KeyNotFound(_)) => {
                return Err(EngineError::RemoteKeyMissing(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        self.remote.fetch(key, dest)?;
        Ok(())
    }

    fn poll_until_available(&self, key: &str, waiting: &mut WaitingLock<'_>) -> Result<()> {
        let timeout = self.config.restore_timeout();
        let deadline = Instant::now() + timeout;
        let mut delay = self.config.restore_initial_delay();
        loop {
            if Instant::now() >= deadline {
                return Err(EngineError::RestoreTimeout {
                    key: key.to_string(),
                    timeout,
                });
            }
            waiting.wait_and_renew(delay);
            match self.remote.restore_status(key)? {
                RestoreStatus::Available => return Ok(()),
                RestoreStatus::Pending => {}
                RestoreStatus::NotAvailable | RestoreStatus::Expired => {
                    // The thaw lapsed or was never registered; ask again.
                    debug!(key, "re-requesting restore");
                    self.remote.restore(key)?;
                }
            }
            delay = delay.saturating_mul(2).min(Duration::from_secs(60));
        }
    }
}

fn copy_to_destination(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)?;
    Ok(())
}
