//! Named digest algorithms and hex digests.
//!
//! Algorithms are identified by the wire names carried in storage requests
//! ("MD5", "SHA-256"); an unknown name is a hard configuration failure, not
//! a fallback.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::{Digest as _, Md5};
use sha2::Sha256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("unknown checksum algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(name: &str) -> Result<Self, ChecksumError> {
        match name {
            "MD5" => Ok(ChecksumAlgorithm::Md5),
            "SHA-256" | "SHA256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(ChecksumError::UnknownAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "MD5"),
            ChecksumAlgorithm::Sha256 => write!(f, "SHA-256"),
        }
    }
}

pub(crate) enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    pub(crate) fn finish(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

impl ChecksumAlgorithm {
    pub(crate) fn hasher(self) -> Hasher {
        match self {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Hex digest of a byte slice.
    pub fn digest_bytes(self, data: &[u8]) -> String {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

/// Streaming hex digest of a file.
pub fn hex_digest(algorithm: ChecksumAlgorithm, path: &Path) -> Result<String, ChecksumError> {
    let mut file = File::open(path)?;
    let mut hasher = algorithm.hasher();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}
