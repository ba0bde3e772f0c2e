//! Age-based eviction of restore-cache directories.

use std::fs;
use std::path::Path;
use std::time::SystemTime;

use tracing::{debug, warn};

use frostpack_archive::naming;

use crate::error::Result;
use crate::workspace::is_empty_dir;

/// Caller must hold the RESTORE lock on the directory (acquired with a
/// bounded try, skipping the directory on timeout).
pub struct CleanDirectoryTask;

impl CleanDirectoryTask {
    /// Delete regular files older than `cutoff` directly inside `dir`,
    /// leaving newer files and subdirectories alone. Returns true when the
    /// emptied directory itself (and its cached archive) was removed.
    pub fn run(&self, dir: &Path, cutoff: SystemTime) -> Result<bool> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            match metadata.modified() {
                Ok(modified) if modified < cutoff => {
                    fs::remove_file(entry.path())?;
                    debug!(file = %entry.path().display(), "evicted aged cache file");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(file = %entry.path().display(), error = %e, "no modification time");
                }
            }
        }

        if !is_empty_dir(dir)? {
            return Ok(false);
        }
        fs::remove_dir(dir)?;
        if let (Some(parent), Some(name)) = (dir.parent(), dir.file_name().and_then(|n| n.to_str()))
        {
            let archive = parent.join(naming::archive_name_from_building_dir(name));
            if archive.is_file() {
                fs::remove_file(archive)?;
            }
        }
        debug!(dir = %dir.display(), "removed emptied cache directory");
        Ok(true)
    }
}
