use std::io;
use std::time::Duration;

use thiserror::Error;

use frostpack_archive::{BundleError, ChecksumError, FetchError};
use frostpack_archive::naming::NamingError;
use frostpack_remote::RemoteError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed storage key {0:?}")]
    MalformedKey(String),

    #[error("file {0:?} not found in the local workspace")]
    NotFoundLocally(String),

    #[error("no archive under remote key {0:?}")]
    RemoteKeyMissing(String),

    #[error("restore of {key:?} timed out after {timeout:?}")]
    RestoreTimeout { key: String, timeout: Duration },

    #[error("building directory {0:?} could not be closed")]
    CloseFailed(String),

    #[error("worker pool build failure: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
