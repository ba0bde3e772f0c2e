//! Download-and-verify of a single file into the workspace.
//!
//! The contract is fail-fast: on checksum mismatch or mid-copy I/O failure
//! the partial destination file is deleted before the error is returned, so
//! callers never observe a half-written entry.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::checksum::{ChecksumAlgorithm, ChecksumError};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("malformed origin url {0:?}")]
    MalformedUrl(String),

    #[error("unsupported origin url scheme {scheme:?} in {url:?}")]
    UnsupportedScheme { scheme: String, url: String },

    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Resolve an origin URL to a local source path.
///
/// Only `file://` origins are supported here; remote origins are fetched by
/// the caller's transfer layer before entering the engine.
pub fn parse_origin_url(url: &str) -> Result<PathBuf, FetchError> {
    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(FetchError::MalformedUrl(url.to_string()));
    };
    if scheme != "file" {
        return Err(FetchError::UnsupportedScheme {
            scheme: scheme.to_string(),
            url: url.to_string(),
        });
    }
    if rest.is_empty() {
        return Err(FetchError::MalformedUrl(url.to_string()));
    }
    Ok(PathBuf::from(rest))
}

/// Copy the origin to `dest` while digesting, verifying against `expected`.
///
/// Returns the number of bytes written. On any failure after the destination
/// has been created, the partial file is removed.
pub fn fetch_and_verify(
    origin_url: &str,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
    expected: &str,
) -> Result<u64, FetchError> {
    let source = parse_origin_url(origin_url)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    debug!(source = %source.display(), dest = %dest.display(), "fetching file");

    match copy_and_digest(&source, dest, algorithm) {
        Ok((size, actual)) => {
            if actual.eq_ignore_ascii_case(expected) {
                Ok(size)
            } else {
                let _ = fs::remove_file(dest);
                Err(FetchError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                })
            }
        }
        Err(e) => {
            let _ = fs::remove_file(dest);
            Err(FetchError::Io(e))
        }
    }
}

fn copy_and_digest(
    source: &Path,
    dest: &Path,
    algorithm: ChecksumAlgorithm,
) -> io::Result<(u64, String)> {
    let mut input = File::open(source)?;
    let mut output = File::create(dest)?;
    let mut hasher = algorithm.hasher();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n])?;
        total += n as u64;
    }
    output.sync_all()?;
    Ok((total, hasher.finish()))
}
