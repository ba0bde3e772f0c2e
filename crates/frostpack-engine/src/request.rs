//! Request types carried through batch dispatch.

use std::path::PathBuf;

/// One incoming file to place into the build workspace.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Where to read the content from, `file://` scheme.
    pub origin_url: String,
    /// Target file name inside the building directory.
    pub file_name: String,
    /// Expected content checksum, hex.
    pub checksum: String,
    /// Checksum algorithm name as carried on the wire ("MD5", "SHA-256").
    pub algorithm: String,
    /// Node sub-path the file accumulates under; empty for the root node.
    pub node: String,
}

/// One file to materialize at a caller-chosen destination.
#[derive(Debug, Clone)]
pub struct RetrieveRequest {
    /// Storage key: `<node>/<stamp>.zip?fileName=<name>` for a small file,
    /// a plain relative path for a big file.
    pub key: String,
    /// Where to copy the retrieved content.
    pub destination: PathBuf,
}

/// One stored file to remove.
#[derive(Debug, Clone)]
pub struct DeleteRequest {
    /// Storage key, same forms as [`RetrieveRequest::key`].
    pub key: String,
    /// True while the file's archive has not been uploaded yet, meaning the
    /// content still lives in the open build workspace.
    pub pending: bool,
}
