//! Closing, zipping and uploading of building directories.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use frostpack_archive::naming;
use frostpack_archive::{create_bundle, hex_digest, ChecksumAlgorithm};
use frostpack_config::Config;
use frostpack_remote::RemoteBackend;

use crate::error::{EngineError, Result};
use crate::progress::PeriodicProgress;
use crate::workspace::{remote_key, Workspace};

/// How the directory came to need submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVariant {
    /// A directory closed by size or age; its archive has never been
    /// uploaded.
    Ready,
    /// A directory rebuilt in the restore cache after deletions, reachable
    /// through a symlink; its old archive must be replaced remotely.
    Updated,
}

/// What the submission did, for the sweep's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Archive uploaded and local sources removed.
    Uploaded,
    /// Empty directory cleaned up (remote archive deleted for Updated).
    Removed,
    /// Upload failed; sources kept for retry.
    Failed,
}

/// Caller must hold the RESTORE lock on the directory for [`SubmitVariant::Ready`],
/// or the STORE lock on the node for [`SubmitVariant::Updated`].
pub struct SubmitArchiveTask<'a> {
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub remote: &'a dyn RemoteBackend,
    pub storage_name: &'a str,
}

impl SubmitArchiveTask<'_> {
    /// Close a `_current` directory whose embedded timestamp has aged past
    /// the configured maximum. Returns the closed path, or `None` when the
    /// directory is not yet ready (or was already closed by a racing store).
    ///
    /// Runs under the node's STORE lock, the same token store tasks hold.
    pub fn close_if_aged(&self, building_dir: &Path) -> Result<Option<PathBuf>> {
        let dir_name = file_name_of(building_dir)?.to_string();
        if !naming::is_current(&dir_name) {
            return Ok(Some(building_dir.to_path_buf()));
        }
        let created = naming::parse_building_dir_timestamp(&dir_name)?;
        let age = Utc::now()
            .signed_duration_since(created)
            .to_std()
            .unwrap_or_default();
        if age < self.config.archive_max_age() {
            return Ok(None);
        }
        let closed = building_dir.with_file_name(naming::strip_current_suffix(&dir_name));
        if !building_dir.exists() {
            // A size-triggered rotation got there first.
            return Ok(closed.is_dir().then_some(closed));
        }
        fs::rename(building_dir, &closed)?;
        debug!(dir = %closed.display(), "closed building directory on age threshold");
        Ok(Some(closed))
    }

    /// Submit one closed building directory.
    pub fn run(
        &self,
        building_dir: &Path,
        variant: SubmitVariant,
        progress: &dyn PeriodicProgress,
    ) -> Result<SubmitOutcome> {
        let files = contained_files(building_dir)?;
        if files.is_empty() {
            return self.remove_empty(building_dir, variant, progress);
        }
        self.zip_and_upload(building_dir, variant, &files, progress)
    }

    fn remove_empty(
        &self,
        building_dir: &Path,
        variant: SubmitVariant,
        progress: &dyn PeriodicProgress,
    ) -> Result<SubmitOutcome> {
        let key = self.archive_key(building_dir)?;
        if variant == SubmitVariant::Updated {
            // All of the archive's files were deleted; the remote copy goes
            // too, along with the cache copy the symlink points at.
            self.remote.delete(&key)?;
            let cache_copy = fs::read_link(building_dir).ok();
            fs::remove_file(building_dir)?;
            if let Some(cache_copy) = cache_copy {
                if cache_copy.is_dir() {
                    fs::remove_dir_all(&cache_copy)?;
                }
                if let (Some(parent), Some(dir_name)) =
                    (cache_copy.parent(), file_name_of(&cache_copy).ok())
                {
                    let stale = parent.join(naming::archive_name_from_building_dir(dir_name));
                    if stale.is_file() {
                        fs::remove_file(stale)?;
                    }
                }
            }
            progress.archive_deleted(self.storage_name, &key);
            info!(key, "deleted emptied archive");
        } else {
            fs::remove_dir_all(building_dir)?;
        }
        Ok(SubmitOutcome::Removed)
    }

    fn zip_and_upload(
        &self,
        building_dir: &Path,
        variant: SubmitVariant,
        files: &[PathBuf],
        progress: &dyn PeriodicProgress,
    ) -> Result<SubmitOutcome> {
        let dir_name = file_name_of(building_dir)?;
        let archive_name = naming::archive_name_from_building_dir(dir_name);
        let zip_path = building_dir
            .parent()
            .unwrap_or(building_dir)
            .join(&archive_name);
        create_bundle(&zip_path, files)?;

        let key = self.archive_key(building_dir)?;
        let upload = (|| -> Result<(String, u64)> {
            let checksum = hex_digest(ChecksumAlgorithm::Md5, &zip_path)?;
            let size = zip_path.metadata()?.len();
            self.remote.put(&zip_path, &key)?;
            Ok((checksum, size))
        })();

        match upload {
            Ok((checksum, size)) => {
                let url = self.remote.entry_url(&key);
                progress.archive_stored(self.storage_name, &url, &checksum, size);
                for file in files {
                    if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                        progress.pending_action_succeeded(&naming::small_file_key(&url, name));
                    }
                }
                self.remove_sources(building_dir)?;
                fs::remove_file(&zip_path)?;
                // Uploading a rebuilt archive invalidates the cached zip of
                // the previous version.
                if variant == SubmitVariant::Updated {
                    let stale = self
                        .workspace
                        .cache_root()
                        .join(self.node_rel(building_dir)?)
                        .join(&archive_name);
                    if stale.is_file() {
                        fs::remove_file(stale)?;
                    }
                }
                info!(key, entries = files.len(), "uploaded archive");
                Ok(SubmitOutcome::Uploaded)
            }
            Err(e) => {
                warn!(key, error = %e, "archive upload failed");
                for file in files {
                    progress.pending_action_error(file);
                }
                // Keep the sources for retry but never leak the working zip.
                let _ = fs::remove_file(&zip_path);
                Ok(SubmitOutcome::Failed)
            }
        }
    }

    /// Delete the directory's content. A symlinked directory keeps its cache
    /// copy: only the link itself is removed.
    fn remove_sources(&self, building_dir: &Path) -> Result<()> {
        if building_dir.symlink_metadata()?.file_type().is_symlink() {
            fs::remove_file(building_dir)?;
        } else {
            fs::remove_dir_all(building_dir)?;
        }
        Ok(())
    }

    fn node_rel(&self, building_dir: &Path) -> Result<PathBuf> {
        let parent = building_dir.parent().unwrap_or(building_dir);
        Ok(parent
            .strip_prefix(self.workspace.zip_root())
            .unwrap_or(Path::new(""))
            .to_path_buf())
    }

    fn archive_key(&self, building_dir: &Path) -> Result<String> {
        let dir_name = file_name_of(building_dir)?;
        let archive_name = naming::archive_name_from_building_dir(dir_name);
        let node = self.node_rel(building_dir)?;
        let rel = if node.as_os_str().is_empty() {
            archive_name
        } else {
            format!("{}/{}", node.display(), archive_name)
        };
        Ok(remote_key(&self.config.storage.root_path, &rel))
    }
}

fn file_name_of(dir: &Path) -> Result<&str> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::MalformedKey(dir.display().to_string()))
}

fn contained_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.metadata()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
