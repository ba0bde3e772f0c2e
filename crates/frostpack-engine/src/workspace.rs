//! Path arithmetic over the local build workspace.
//!
//! Layout, fixed by convention:
//!
//! ```text
//!   <root>/zip/<node>/rs_zip_<stamp>[_current]/<file>   build directories
//!   <root>/tmp/<node>/...                               restore cache
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use frostpack_archive::naming;

use crate::error::{EngineError, Result};

/// Root of the local workspace, giving access to both subtrees.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Workspace { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/zip`, holding building directories.
    pub fn zip_root(&self) -> PathBuf {
        self.root.join(naming::ZIP_DIR)
    }

    /// `<root>/tmp`, holding the restore cache.
    pub fn cache_root(&self) -> PathBuf {
        self.root.join(naming::TMP_DIR)
    }

    /// Node directory under the build subtree; `node` may be empty.
    pub fn node_dir(&self, node: &str) -> PathBuf {
        join_relative(&self.zip_root(), node)
    }

    /// Node directory under the cache subtree.
    pub fn cache_node_dir(&self, node: &str) -> PathBuf {
        join_relative(&self.cache_root(), node)
    }

    /// The open building directory of a node, if one exists.
    pub fn current_building_dir(&self, node: &str) -> Result<Option<PathBuf>> {
        let node_dir = self.node_dir(node);
        if !node_dir.is_dir() {
            return Ok(None);
        }
        for entry in fs::read_dir(&node_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(naming::BUILDING_DIRECTORY_PREFIX)
                && naming::is_current(name)
                && entry.file_type()?.is_dir()
            {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Look for a small file under the closed or `_current` form of its
    /// building directory.
    pub fn find_small_file(&self, reference: &SmallFileRef) -> Option<PathBuf> {
        let file_name = reference.file_name.as_deref()?;
        let node_dir = self.node_dir(&reference.node);
        let closed = node_dir.join(reference.closed_dir_name()).join(file_name);
        if closed.is_file() {
            return Some(closed);
        }
        let current = node_dir
            .join(reference.current_dir_name())
            .join(file_name);
        current.is_file().then_some(current)
    }
}

/// Sum of regular-file lengths directly inside `dir`.
pub fn directory_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}

/// True when `dir` has no entries at all.
pub fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Remote key for a workspace-relative path, under the configured prefix.
pub fn remote_key(root_path: &str, rel: &str) -> String {
    if root_path.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", root_path.trim_end_matches('/'), rel)
    }
}

fn join_relative(base: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// A storage key decomposed into node, archive and optional in-archive name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmallFileRef {
    /// Node sub-path; empty for the root node.
    pub node: String,
    /// Archive file name, `<stamp>.zip`.
    pub archive_name: String,
    /// In-archive file name; `None` when the key addresses a big file or
    /// the archive itself.
    pub file_name: Option<String>,
}

impl SmallFileRef {
    /// Parse `<node>/<stamp>.zip?fileName=<name>`.
    pub fn parse(key: &str) -> Result<Self> {
        let (archive_path, file_name) = naming::split_small_file_key(key);
        let (node, archive_name) = match archive_path.rsplit_once('/') {
            Some((node, archive)) => (node, archive),
            None => ("", archive_path),
        };
        if archive_name.is_empty() || !archive_name.ends_with(naming::ARCHIVE_EXTENSION) {
            return Err(EngineError::MalformedKey(key.to_string()));
        }
        Ok(SmallFileRef {
            node: node.to_string(),
            archive_name: archive_name.to_string(),
            file_name: file_name.map(str::to_string),
        })
    }

    /// Relative remote path of the archive.
    pub fn archive_rel(&self) -> String {
        if self.node.is_empty() {
            self.archive_name.clone()
        } else {
            format!("{}/{}", self.node, self.archive_name)
        }
    }

    /// Closed building directory name for this archive.
    pub fn closed_dir_name(&self) -> String {
        naming::building_dir_from_archive_name(&self.archive_name)
    }

    /// Open building directory name for this archive.
    pub fn current_dir_name(&self) -> String {
        format!(
            "{}{}",
            self.closed_dir_name(),
            naming::CURRENT_ARCHIVE_SUFFIX
        )
    }
}
