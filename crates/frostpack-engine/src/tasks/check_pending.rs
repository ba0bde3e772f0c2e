//! Reconciliation of files whose upload state is uncertain.

use std::fs;

use tracing::{debug, error, warn};

use frostpack_archive::naming;
use frostpack_config::Config;
use frostpack_remote::RemoteBackend;

use crate::error::Result;
use crate::progress::PeriodicProgress;
use crate::workspace::{is_empty_dir, remote_key, SmallFileRef, Workspace};

/// Caller must hold the RESTORE lock on the file's archive.
pub struct CheckPendingActionTask<'a> {
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub remote: &'a dyn RemoteBackend,
}

impl CheckPendingActionTask<'_> {
    /// Settle one pending small-file key against local and remote presence.
    ///
    /// The four combinations are each deterministic; (absent, absent) is
    /// data loss that can only come from external interference and is
    /// escalated as an error outcome.
    pub fn run(&self, key: &str, progress: &dyn PeriodicProgress) {
        if let Err(e) = self.execute(key, progress) {
            warn!(key, error = %e, "pending-action check failed");
        }
    }

    fn execute(&self, key: &str, progress: &dyn PeriodicProgress) -> Result<()> {
        let reference = SmallFileRef::parse(key)?;
        let archive_key = remote_key(&self.config.storage.root_path, &reference.archive_rel());
        let local = self.workspace.find_small_file(&reference);
        let remote_present = self.remote.exists(&archive_key)?;

        let url = |name: &str| naming::small_file_key(&self.remote.entry_url(&archive_key), name);

        match (local, remote_present) {
            (Some(local_path), true) => {
                // The upload happened but its completion was never recorded.
                fs::remove_file(&local_path)?;
                if let Some(parent) = local_path.parent() {
                    if is_empty_dir(parent)? {
                        fs::remove_dir(parent)?;
                    }
                }
                if let Some(name) = &reference.file_name {
                    progress.pending_action_succeeded(&url(name));
                }
                debug!(key, "reconciled: removed local copy of uploaded file");
            }
            (Some(_), false) => {
                // Nominal in-progress state; a future sweep will submit it.
                debug!(key, "still pending upload");
            }
            (None, true) => {
                if let Some(name) = &reference.file_name {
                    progress.pending_action_succeeded(&url(name));
                }
                debug!(key, "reconciled: completion notification was lost");
            }
            (None, false) => {
                let expected = self
                    .workspace
                    .node_dir(&reference.node)
                    .join(reference.closed_dir_name())
                    .join(reference.file_name.as_deref().unwrap_or_default());
                error!(key, path = %expected.display(), "file neither local nor remote, data lost");
                progress.pending_action_error(&expected);
            }
        }
        Ok(())
    }
}
