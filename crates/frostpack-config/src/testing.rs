//! Test workspace abstraction for isolated testing.
//!
//! Provides `TestWorkspace` to manage:
//! - An isolated workspace root with `zip/` and `tmp/`
//! - A directory standing in for the remote tier
//! - A source directory holding files to store

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated on-disk layout for one test
pub struct TestWorkspace {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Workspace root holding `zip/` and `tmp/`
    pub workspace_root: PathBuf,
    /// Directory standing in for the remote tier
    pub remote_root: PathBuf,
    /// Source files the tests "store" from
    pub source_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestWorkspace {
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let workspace_root = root.join("workspace");
        let remote_root = root.join("remote");
        let source_root = root.join("source");

        std::fs::create_dir_all(workspace_root.join("zip"))?;
        std::fs::create_dir_all(workspace_root.join("tmp"))?;
        std::fs::create_dir_all(&remote_root)?;
        std::fs::create_dir_all(&source_root)?;

        Ok(Self {
            _temp_dir: temp_dir,
            workspace_root,
            remote_root,
            source_root,
            test_id,
        })
    }

    /// A Config pointed at this workspace, defaults otherwise.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.workspace_path = self.workspace_root.clone();
        config
    }

    /// Create a source file the tests can store, returning its path.
    pub fn create_source_file(&self, name: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.source_root.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// `file://` URL for a source file created by [`create_source_file`].
    ///
    /// [`create_source_file`]: TestWorkspace::create_source_file
    pub fn source_url(&self, name: &str) -> String {
        format!("file://{}", self.source_root.join(name).display())
    }

    /// Path of the `zip/` subtree for a node prefix.
    pub fn zip_dir(&self, node: &str) -> PathBuf {
        self.workspace_root.join("zip").join(node)
    }

    /// Path of the `tmp/` subtree for a node prefix.
    pub fn tmp_dir(&self, node: &str) -> PathBuf {
        self.workspace_root.join("tmp").join(node)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new().expect("Failed to create test workspace")
    }
}
