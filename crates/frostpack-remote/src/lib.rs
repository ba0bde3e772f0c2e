//! # frostpack-remote
//!
//! Abstraction over the archival tier holding closed archives and big files.
//!
//! The tier is cold by default: an object must be restored before it can be
//! fetched, and restoration is asynchronous. [`RemoteBackend`] exposes the
//! minimal surface the engine needs:
//!
//! ```text
//!   put / delete / exists      object lifecycle
//!   restore / restore_status   asynchronous thaw of a cold object
//!   fetch                      download of a restored object
//!   entry_url                  stable public identifier of an object
//! ```
//!
//! [`DirectoryBackend`] implements the contract on a local directory with a
//! configurable thaw delay, which is what the engine tests run against.

pub mod directory;

use std::io;
use std::path::Path;

use thiserror::Error;

pub use directory::DirectoryBackend;

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote key {0:?} not found")]
    KeyNotFound(String),

    #[error("remote key {0:?} is cold and has not been restored")]
    NotRestored(String),

    #[error("remote backend failure: {0}")]
    Backend(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Outcome of a restore request on a cold object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreRequestOutcome {
    /// The object is already warm; fetch immediately.
    AlreadyAvailable,
    /// The thaw was accepted and is in progress.
    Accepted,
    /// No object under that key.
    KeyNotFound,
}

/// Thaw state of an object that had a restore requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// Warm and fetchable.
    Available,
    /// Thaw still in progress.
    Pending,
    /// No restore in progress and the object is cold.
    NotAvailable,
    /// A previous restore lapsed and the object went cold again.
    Expired,
}

/// Operations against the archival tier.
pub trait RemoteBackend: Send + Sync {
    /// Upload `local` under `key`, replacing any existing object.
    fn put(&self, local: &Path, key: &str) -> Result<()>;

    /// Download the object under `key` to `dest`. Fails with
    /// [`RemoteError::NotRestored`] when the object is still cold.
    fn fetch(&self, key: &str, dest: &Path) -> Result<()>;

    /// Delete the object under `key`. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// Request an asynchronous thaw of the object under `key`.
    fn restore(&self, key: &str) -> Result<RestoreRequestOutcome>;

    /// Poll the thaw state of the object under `key`.
    fn restore_status(&self, key: &str) -> Result<RestoreStatus>;

    /// Stable public URL of the object under `key`, for reporting.
    fn entry_url(&self, key: &str) -> String;
}
