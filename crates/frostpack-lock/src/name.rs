//! Lock name derivation.

use std::fmt;
use std::path::Path;

pub const LOCK_PREFIX: &str = "LOCK_";

/// The two lock families. Store locks guard building-directory mutation,
/// restore locks guard cache rebuilds and retrieval of the same archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Store,
    Restore,
}

impl fmt::Display for LockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKind::Store => write!(f, "STORE"),
            LockKind::Restore => write!(f, "RESTORE"),
        }
    }
}

/// Build the lock name guarding `target`.
///
/// The name is keyed on the path relative to the workspace root, so the same
/// directory always maps to the same lock regardless of where the workspace
/// is mounted. An optional storage name namespaces locks between storages
/// sharing one process.
pub fn lock_name(
    kind: LockKind,
    storage_name: Option<&str>,
    workspace_root: &Path,
    target: &Path,
) -> String {
    let relative = target.strip_prefix(workspace_root).unwrap_or(target);
    let mut name = String::from(LOCK_PREFIX);
    name.push_str(&kind.to_string());
    if let Some(storage) = storage_name {
        name.push('_');
        name.push_str(storage);
    }
    name.push('_');
    name.push_str(&relative.to_string_lossy());
    name
}
