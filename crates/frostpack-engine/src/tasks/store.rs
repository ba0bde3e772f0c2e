//! Placement of one incoming file into the build workspace.

use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, warn};

use frostpack_archive::naming;
use frostpack_archive::{fetch_and_verify, hex_digest, ChecksumAlgorithm};
use frostpack_config::Config;
use frostpack_remote::RemoteBackend;

use crate::error::{EngineError, Result};
use crate::progress::StorageProgress;
use crate::request::StoreRequest;
use crate::workspace::{directory_size, remote_key, Workspace};

/// Caller must hold the STORE lock on the request's node.
pub struct StoreSmallFileTask<'a> {
    pub config: &'a Config,
    pub workspace: &'a Workspace,
    pub remote: &'a dyn RemoteBackend,
}

enum Stored {
    /// Written into the open building directory; archive upload pending.
    Pending { url: String, size: u64 },
    /// Large enough to bypass archiving, shipped to the remote tier directly.
    Direct { url: String, size: u64 },
}

impl StoreSmallFileTask<'_> {
    pub fn run(&self, request: &StoreRequest, progress: &dyn StorageProgress) {
        match self.execute(request) {
            Ok(Stored::Pending { url, size }) => progress.stored_pending(request, &url, size),
            Ok(Stored::Direct { url, size }) => progress.stored(request, &url, size),
            Err(e) => {
                warn!(file = request.file_name, node = request.node, error = %e, "store failed");
                progress.store_failed(request, &e.to_string());
            }
        }
    }

    fn execute(&self, request: &StoreRequest) -> Result<Stored> {
        let algorithm: ChecksumAlgorithm = request.algorithm.parse()?;
        let node_dir = self.workspace.node_dir(&request.node);
        fs::create_dir_all(&node_dir)?;

        let building_dir = match self.workspace.current_building_dir(&request.node)? {
            Some(dir) => dir,
            None => {
                let dir = node_dir.join(naming::new_building_dir_name(Utc::now()));
                fs::create_dir(&dir)?;
                debug!(dir = %dir.display(), "opened building directory");
                dir
            }
        };

        // Collision resolution by checksum: same content is a no-op success,
        // different content gets a counted name.
        let mut file_name = request.file_name.clone();
        let mut count = 1;
        loop {
            let candidate = building_dir.join(&file_name);
            if !candidate.exists() {
                break;
            }
            let existing = hex_digest(algorithm, &candidate)?;
            if existing.eq_ignore_ascii_case(&request.checksum) {
                debug!(file = file_name, "already stored, identical checksum");
                let size = candidate.metadata()?.len();
                let url = self.small_file_url(request, &building_dir, &file_name)?;
                return Ok(Stored::Pending { url, size });
            }
            count += 1;
            file_name = naming::add_count_before_extension(&request.file_name, count);
        }

        let destination = building_dir.join(&file_name);
        let size = fetch_and_verify(&request.origin_url, &destination, algorithm, &request.checksum)?;

        if size >= self.config.archive.small_file_max_size {
            return self.store_directly(request, &destination, size);
        }

        let url = self.small_file_url(request, &building_dir, &file_name)?;

        if directory_size(&building_dir)? > self.config.archive.max_size {
            self.close_directory(&building_dir)?;
        }

        Ok(Stored::Pending { url, size })
    }

    /// Big files skip aggregation: upload under the node path, cache a copy,
    /// and remove the workspace copy.
    fn store_directly(
        &self,
        request: &StoreRequest,
        workspace_copy: &Path,
        size: u64,
    ) -> Result<Stored> {
        let rel = if request.node.is_empty() {
            request.file_name.clone()
        } else {
            format!("{}/{}", request.node, request.file_name)
        };
        let key = remote_key(&self.config.storage.root_path, &rel);
        self.remote.put(workspace_copy, &key)?;

        let cached = self
            .workspace
            .cache_node_dir(&request.node)
            .join(&request.file_name);
        if let Some(parent) = cached.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(workspace_copy, &cached)?;
        debug!(key, size, "stored big file directly");

        Ok(Stored::Direct {
            url: self.remote.entry_url(&key),
            size,
        })
    }

    fn small_file_url(
        &self,
        request: &StoreRequest,
        building_dir: &Path,
        file_name: &str,
    ) -> Result<String> {
        let dir_name = dir_file_name(building_dir)?;
        let archive = naming::archive_name_from_building_dir(dir_name);
        let rel = if request.node.is_empty() {
            archive
        } else {
            format!("{}/{}", request.node, archive)
        };
        let key = remote_key(&self.config.storage.root_path, &rel);
        Ok(naming::small_file_key(&self.remote.entry_url(&key), file_name))
    }

    fn close_directory(&self, building_dir: &Path) -> Result<()> {
        let dir_name = dir_file_name(building_dir)?;
        let closed = building_dir.with_file_name(naming::strip_current_suffix(dir_name));
        fs::rename(building_dir, &closed).map_err(|e| {
            warn!(dir = %building_dir.display(), error = %e, "closing rename failed");
            EngineError::CloseFailed(building_dir.display().to_string())
        })?;
        debug!(dir = %closed.display(), "closed building directory on size threshold");
        Ok(())
    }
}

fn dir_file_name(dir: &Path) -> Result<&str> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::MalformedKey(dir.display().to_string()))
}
