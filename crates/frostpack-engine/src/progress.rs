//! Progress callbacks reporting per-request outcomes.
//!
//! The engine only ever calls out through these traits; it never consults
//! them for decisions. Implementations must tolerate concurrent calls from
//! worker threads.

use std::path::Path;

use crate::request::{DeleteRequest, RetrieveRequest, StoreRequest};

/// Outcomes of store requests.
pub trait StorageProgress: Send + Sync {
    /// Durably stored; nothing further will happen for this request.
    fn stored(&self, request: &StoreRequest, url: &str, size: u64);

    /// Written into the build workspace; the enclosing archive has not been
    /// uploaded yet so a pending action remains.
    fn stored_pending(&self, request: &StoreRequest, url: &str, size: u64);

    fn store_failed(&self, request: &StoreRequest, cause: &str);
}

/// Outcomes of retrieve requests.
pub trait RestorationProgress: Send + Sync {
    fn restored(&self, request: &RetrieveRequest, local: &Path);

    fn restore_failed(&self, request: &RetrieveRequest, cause: &str);
}

/// Outcomes of delete requests.
pub trait DeletionProgress: Send + Sync {
    fn deleted(&self, request: &DeleteRequest);

    fn delete_failed(&self, request: &DeleteRequest, cause: &str);
}

/// Notifications from periodic sweeps (submission, reconciliation).
pub trait PeriodicProgress: Send + Sync {
    /// An archive reached the remote tier.
    fn archive_stored(&self, storage: &str, url: &str, checksum: &str, size: u64);

    /// An archive was removed from the remote tier.
    fn archive_deleted(&self, storage: &str, path: &str);

    /// A file's pending action resolved: its archive is remote.
    fn pending_action_succeeded(&self, url: &str);

    /// A file's pending action failed; the local path is kept for retry,
    /// or reported as lost when it no longer exists anywhere.
    fn pending_action_error(&self, path: &Path);

    /// No pending actions remain for this storage.
    fn all_pending_actions_succeeded(&self, storage: &str);
}
