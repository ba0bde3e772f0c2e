//! Batch dispatch and periodic sweeps.
//!
//! Two fixed-size pools: one for store batches (memory-heavy downloads),
//! one for everything else. Each request becomes one pool task run under
//! the lock its operation requires; one failing request never aborts its
//! siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use frostpack_archive::naming;
use frostpack_config::Config;
use frostpack_lock::{lock_name, LockKind, LockService, LockServiceExt, WaitingLock};
use frostpack_remote::RemoteBackend;

use crate::error::Result;
use crate::progress::{DeletionProgress, PeriodicProgress, RestorationProgress, StorageProgress};
use crate::request::{DeleteRequest, RetrieveRequest, StoreRequest};
use crate::tasks::{
    CheckPendingActionTask, CleanDirectoryTask, DeleteSmallFileTask, DeleteVariant, RetrieveTask,
    RetrieveVariant, StoreSmallFileTask, SubmitArchiveTask, SubmitVariant,
};
use crate::workspace::{SmallFileRef, Workspace};

const DEFAULT_STORAGE_NAME: &str = "frostpack";

pub struct Engine {
    config: Config,
    workspace: Workspace,
    remote: Arc<dyn RemoteBackend>,
    locks: Arc<dyn LockService>,
    store_pool: ThreadPool,
    task_pool: ThreadPool,
}

impl Engine {
    pub fn new(
        config: Config,
        remote: Arc<dyn RemoteBackend>,
        locks: Arc<dyn LockService>,
    ) -> Result<Self> {
        let workspace = Workspace::new(config.storage.workspace_path.clone());
        let threads = config.runtime.parallel_tasks.max(1);
        let store_pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        let task_pool = ThreadPoolBuilder::new().num_threads(threads).build()?;
        Ok(Engine {
            config,
            workspace,
            remote,
            locks,
            store_pool,
            task_pool,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn storage_name(&self) -> &str {
        self.config
            .storage
            .storage_name
            .as_deref()
            .unwrap_or(DEFAULT_STORAGE_NAME)
    }

    fn lock(&self, kind: LockKind, target: &Path) -> String {
        lock_name(
            kind,
            self.config.storage.storage_name.as_deref(),
            self.workspace.root(),
            target,
        )
    }

    /// Store a batch, blocking until every request has reported an outcome.
    pub fn store(&self, requests: &[StoreRequest], progress: &dyn StorageProgress) {
        self.store_pool.scope(|scope| {
            for request in requests {
                scope.spawn(move |_| {
                    let task = StoreSmallFileTask {
                        config: &self.config,
                        workspace: &self.workspace,
                        remote: &*self.remote,
                    };
                    let node_dir = self.workspace.node_dir(&request.node);
                    let name = self.lock(LockKind::Store, &node_dir);
                    self.locks
                        .with_lock(&name, || task.run(request, progress));
                });
            }
        });
    }

    /// Retrieve a batch; variant selection is per request.
    pub fn retrieve(&self, requests: &[RetrieveRequest], progress: &dyn RestorationProgress) {
        self.task_pool.scope(|scope| {
            for request in requests {
                scope.spawn(move |_| self.retrieve_one(request, progress));
            }
        });
    }

    fn retrieve_one(&self, request: &RetrieveRequest, progress: &dyn RestorationProgress) {
        let task = RetrieveTask {
            config: &self.config,
            workspace: &self.workspace,
            remote: &*self.remote,
        };
        if !naming::is_small_file_key(&request.key) {
            let name = self.lock(LockKind::Restore, Path::new(&request.key));
            self.locks.with_lock(&name, || {
                let mut waiting =
                    WaitingLock::new(&name, &*self.locks, self.config.renew_margin());
                task.run(request, RetrieveVariant::BigFile, &mut waiting, progress);
            });
            return;
        }
        let reference = match SmallFileRef::parse(&request.key) {
            Ok(reference) => reference,
            Err(e) => {
                progress.restore_failed(request, &e.to_string());
                return;
            }
        };
        if self.workspace.find_small_file(&reference).is_some() {
            let node_dir = self.workspace.node_dir(&reference.node);
            let name = self.lock(LockKind::Store, &node_dir);
            let served = self.locks.with_lock(&name, || {
                // A submit sweep can ship the directory between dispatch and
                // acquisition; re-check before committing to the local path.
                if self.workspace.find_small_file(&reference).is_none() {
                    return false;
                }
                let mut waiting =
                    WaitingLock::new(&name, &*self.locks, self.config.renew_margin());
                task.run(request, RetrieveVariant::LocalSmallFile, &mut waiting, progress);
                true
            });
            if served {
                return;
            }
        }
        let name = self.lock(LockKind::Restore, &restore_lock_target(&reference));
        self.locks.with_lock(&name, || {
            let mut waiting = WaitingLock::new(&name, &*self.locks, self.config.renew_margin());
            task.run(request, RetrieveVariant::CacheSmallFile, &mut waiting, progress);
        });
    }

    /// Delete a batch; variant selection is per request.
    pub fn delete(&self, requests: &[DeleteRequest], progress: &dyn DeletionProgress) {
        self.task_pool.scope(|scope| {
            for request in requests {
                scope.spawn(move |_| self.delete_one(request, progress));
            }
        });
    }

    fn delete_one(&self, request: &DeleteRequest, progress: &dyn DeletionProgress) {
        let task = DeleteSmallFileTask {
            config: &self.config,
            workspace: &self.workspace,
            remote: &*self.remote,
        };
        let (variant, lock_kind, target) = if !naming::is_small_file_key(&request.key) {
            (
                DeleteVariant::Direct,
                LockKind::Restore,
                PathBuf::from(&request.key),
            )
        } else {
            let reference = match SmallFileRef::parse(&request.key) {
                Ok(reference) => reference,
                Err(e) => {
                    progress.delete_failed(request, &e.to_string());
                    return;
                }
            };
            if request.pending {
                let node_dir = self.workspace.node_dir(&reference.node);
                (DeleteVariant::Local, LockKind::Store, node_dir)
            } else {
                (
                    DeleteVariant::RestoreAndDelete,
                    LockKind::Restore,
                    restore_lock_target(&reference),
                )
            }
        };
        let name = self.lock(lock_kind, &target);
        self.locks.with_lock(&name, || {
            let mut waiting = WaitingLock::new(&name, &*self.locks, self.config.renew_margin());
            task.run(request, variant, &mut waiting, progress);
        });
    }

    /// Periodic sweep: close aged directories, zip and upload every closed
    /// one, and resubmit symlinked directories rebuilt after deletions.
    pub fn submit_sweep(&self, progress: &dyn PeriodicProgress) -> Result<()> {
        let task = SubmitArchiveTask {
            config: &self.config,
            workspace: &self.workspace,
            remote: &*self.remote,
            storage_name: self.storage_name(),
        };

        for dir in self.building_dirs()? {
            let Some(dir_name) = dir.path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let closed = if naming::is_current(dir_name) {
                let node_dir = dir.path.parent().unwrap_or(&dir.path).to_path_buf();
                let name = self.lock(LockKind::Store, &node_dir);
                match self.locks.with_lock(&name, || task.close_if_aged(&dir.path)) {
                    Ok(Some(closed)) => closed,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(dir = %dir.path.display(), error = %e, "closure failed");
                        continue;
                    }
                }
            } else {
                dir.path.clone()
            };

            // A symlinked directory was rebuilt in the cache after deletions
            // and must replace its remote archive; it shares the node's
            // store lock so no store or delete interleaves with the rebuild.
            let (variant, name) = if dir.symlinked {
                let node_dir = closed.parent().unwrap_or(&closed).to_path_buf();
                (SubmitVariant::Updated, self.lock(LockKind::Store, &node_dir))
            } else {
                let rel = closed
                    .strip_prefix(self.workspace.zip_root())
                    .unwrap_or(&closed)
                    .to_path_buf();
                (SubmitVariant::Ready, self.lock(LockKind::Restore, &rel))
            };
            let outcome = self
                .locks
                .with_lock(&name, || task.run(&closed, variant, progress));
            if let Err(e) = outcome {
                warn!(dir = %closed.display(), error = %e, "submission failed");
            }
        }

        if self.building_dirs()?.iter().all(|dir| {
            dir.path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(naming::is_current)
        }) {
            progress.all_pending_actions_succeeded(self.storage_name());
        }
        Ok(())
    }

    /// Reconcile a batch of pending small-file keys (see
    /// [`CheckPendingActionTask`]).
    pub fn check_pending(&self, keys: &[String], progress: &dyn PeriodicProgress) {
        self.task_pool.scope(|scope| {
            for key in keys {
                scope.spawn(move |_| {
                    let task = CheckPendingActionTask {
                        config: &self.config,
                        workspace: &self.workspace,
                        remote: &*self.remote,
                    };
                    let target = match SmallFileRef::parse(key) {
                        Ok(reference) => restore_lock_target(&reference),
                        Err(e) => {
                            warn!(key, error = %e, "unparseable pending key");
                            return;
                        }
                    };
                    let name = self.lock(LockKind::Restore, &target);
                    self.locks.with_lock(&name, || task.run(key, progress));
                });
            }
        });
    }

    /// Periodic sweep: evict cache entries older than the configured
    /// lifetime. Directories still referenced by a build-workspace symlink
    /// are skipped, as are directories whose lock is busy.
    pub fn clean_sweep(&self) -> Result<()> {
        let cutoff = SystemTime::now()
            .checked_sub(self.config.cache_lifetime())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let cache_root = self.workspace.cache_root();
        let zip_root = self.workspace.zip_root();

        let mut walker = WalkDir::new(&cache_root).min_depth(1).into_iter();
        while let Some(entry) = walker.next() {
            // Entries can vanish under a concurrent submission; skip them.
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path().to_path_buf();
            let rel = dir.strip_prefix(&cache_root).unwrap_or(&dir);
            let counterpart = zip_root.join(rel);
            if counterpart
                .symlink_metadata()
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false)
            {
                // Still referenced by a pending re-submission; the whole
                // subtree is in use.
                debug!(dir = %dir.display(), "skipping cache directory still linked from workspace");
                walker.skip_current_dir();
                continue;
            }

            let name = self.lock(LockKind::Restore, rel);
            let ran = self
                .locks
                .try_with_lock(&name, self.config.clean_lock_timeout(), || {
                    CleanDirectoryTask.run(&dir, cutoff)
                });
            match ran {
                Some(Ok(removed)) => {
                    if removed {
                        walker.skip_current_dir();
                    }
                }
                Some(Err(e)) => warn!(dir = %dir.display(), error = %e, "cleaning failed"),
                None => debug!(dir = %dir.display(), "lock busy, skipping clean"),
            }
        }
        Ok(())
    }

    fn building_dirs(&self) -> Result<Vec<BuildingDir>> {
        let mut dirs = Vec::new();
        let zip_root = self.workspace.zip_root();
        if !zip_root.is_dir() {
            return Ok(dirs);
        }
        let mut walker = WalkDir::new(&zip_root).into_iter();
        while let Some(entry) = walker.next() {
            // Rotations rename directories mid-walk; skip vanished entries.
            let Ok(entry) = entry else { continue };
            let Some(name) = entry.file_name().to_str() else { continue };
            if !name.starts_with(naming::BUILDING_DIRECTORY_PREFIX) {
                continue;
            }
            let symlinked = entry.path_is_symlink();
            if entry.file_type().is_dir() || symlinked {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                dirs.push(BuildingDir {
                    path: entry.path().to_path_buf(),
                    symlinked,
                });
            }
        }
        Ok(dirs)
    }
}

struct BuildingDir {
    path: PathBuf,
    symlinked: bool,
}

/// One RESTORE token per archive, keyed on its path relative to both
/// subtree roots. Cache retrieval, restore-and-delete, reconciliation,
/// closed-directory submission and cache cleaning all derive the same name
/// for the same archive, so they serialize regardless of which subtree
/// they touch.
fn restore_lock_target(reference: &SmallFileRef) -> PathBuf {
    PathBuf::from(&reference.node).join(reference.closed_dir_name())
}
