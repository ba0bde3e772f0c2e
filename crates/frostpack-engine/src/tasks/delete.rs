//! Deletion of stored small files, local and remote-backed variants.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

use tracing::{debug, info, warn};

use frostpack_archive::extract_all;
use frostpack_config::Config;
use frostpack_lock::WaitingLock;
use frostpack_remote::RemoteBackend;

use crate::error::{EngineError, Result};
use crate::progress::DeletionProgress;
use crate::request::DeleteRequest;
use crate::tasks::retrieve::RetrieveTask;
use crate::workspace::{is_empty_dir, remote_key, SmallFileRef, Workspace};

/// Which deletion path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteVariant {
    /// The file still lives in the build workspace (pending upload).
    /// Runs under the STORE lock on the node.
    Local,
    /// The file's archive is remote; its content is restored into the cache,
    /// the workspace directory becomes a symlink to the cache copy, and the
    /// entry is deleted there for re-upload by the next sweep.
    /// Runs under the RESTORE lock on the archive.
    RestoreAndDelete,
    /// A big file stored outside any archive; plain remote delete.
    Direct,
}

pub struct DeleteSmallFileTask<'a> {
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub remote: &'a dyn RemoteBackend,
}

impl DeleteSmallFileTask<'_> {
    pub fn run(
        &self,
        request: &DeleteRequest,
        variant: DeleteVariant,
        waiting: &mut WaitingLock<'_>,
        progress: &dyn DeletionProgress,
    ) {
        let outcome = match variant {
            DeleteVariant::Local => self.delete_local(request),
            DeleteVariant::RestoreAndDelete => self.restore_and_delete(request, waiting),
            DeleteVariant::Direct => self.delete_direct(request),
        };
        match outcome {
            Ok(()) => progress.deleted(request),
            Err(e) => {
                warn!(key = request.key, error = %e, "delete failed");
                progress.delete_failed(request, &e.to_string());
            }
        }
    }

    fn delete_local(&self, request: &DeleteRequest) -> Result<()> {
        let reference = SmallFileRef::parse(&request.key)?;
        let Some(local) = self.workspace.find_small_file(&reference) else {
            // Already gone; deletion is idempotent.
            debug!(key = request.key, "no local copy to delete");
            return Ok(());
        };
        fs::remove_file(&local)?;
        self.cleanup_emptied_dir(&reference, &local)?;
        debug!(key = request.key, "deleted from build workspace");
        Ok(())
    }

    /// An emptied closed directory has nothing left to submit; drop it and
    /// any remote archive it produced.
    fn cleanup_emptied_dir(&self, reference: &SmallFileRef, deleted: &Path) -> Result<()> {
        let Some(parent) = deleted.parent() else {
            return Ok(());
        };
        if !is_empty_dir(parent)? {
            return Ok(());
        }
        let dir_name = parent.file_name().and_then(|n| n.to_str());
        if dir_name == Some(reference.closed_dir_name().as_str()) {
            let archive_key = remote_key(&self.config.storage.root_path, &reference.archive_rel());
            if self.remote.exists(&archive_key)? {
                self.remote.delete(&archive_key)?;
            }
        }
        fs::remove_dir(parent)?;
        Ok(())
    }

    fn restore_and_delete(
        &self,
        request: &DeleteRequest,
        waiting: &mut WaitingLock<'_>,
    ) -> Result<()> {
        let reference = SmallFileRef::parse(&request.key)?;
        let workspace_dir = self
            .workspace
            .node_dir(&reference.node)
            .join(reference.closed_dir_name());

        if workspace_dir.symlink_metadata().is_err() {
            let cache_node = self.workspace.cache_node_dir(&reference.node);
            let cached_archive = cache_node.join(&reference.archive_name);
            let cache_dir = cache_node.join(reference.closed_dir_name());

            if !cached_archive.is_file() {
                let archive_key =
                    remote_key(&self.config.storage.root_path, &reference.archive_rel());
                let download = RetrieveTask {
                    config: self.config,
                    workspace: self.workspace,
                    remote: self.remote,
                }
                .restore_to_cache(&archive_key, &cached_archive, waiting);
                match download {
                    Ok(()) => {}
                    Err(EngineError::RemoteKeyMissing(_)) => {
                        // Nothing remote to delete from either.
                        debug!(key = request.key, "archive already gone remotely");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            // A retrieval may have extracted single entries here already;
            // the rebuild must hold every archived file before trimming, or
            // the resubmitted archive would silently drop the rest.
            extract_all(&cached_archive, &cache_dir)?;
            if let Some(node_dir) = workspace_dir.parent() {
                fs::create_dir_all(node_dir)?;
            }
            symlink(&cache_dir, &workspace_dir)?;
            info!(key = request.key, "rebuilt archive content in cache");
        }

        let entry = workspace_dir.join(
            reference
                .file_name
                .as_deref()
                .ok_or_else(|| EngineError::MalformedKey(request.key.clone()))?,
        );
        if entry.is_file() {
            fs::remove_file(&entry)?;
        }
        debug!(key = request.key, "deleted entry, awaiting resubmission");
        Ok(())
    }

    fn delete_direct(&self, request: &DeleteRequest) -> Result<()> {
        let key = remote_key(&self.config.storage.root_path, &request.key);
        self.remote.delete(&key)?;
        let cached = self.workspace.cache_root().join(&request.key);
        if cached.is_file() {
            fs::remove_file(cached)?;
        }
        Ok(())
    }
}
