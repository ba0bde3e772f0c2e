//! # frostpack-archive
//!
//! Building blocks for small-file archive bundles:
//!
//! - [`naming`]: pure transforms between building-directory names, archive
//!   file names and small-file keys; the layout conventions are fixed and
//!   shared with companion tooling, so they live in one place.
//! - [`checksum`]: named digest algorithms and hex digests.
//! - [`fetch`]: download-and-verify of a single file with fail-fast
//!   cleanup of partial output.
//! - [`bundle`]: zip creation and extraction.
//!
//! ## Workspace layout
//!
//! ```text
//! <workspace>/
//! ├── zip/                          # build workspace
//! │   └── <node>/
//! │       └── rs_zip_<stamp>[_current]/
//! │           └── <filename>
//! └── tmp/                          # restore cache, mirrors remote paths
//!     └── <node>/
//!         ├── <stamp>.zip
//!         └── rs_zip_<stamp>/
//! ```

pub mod bundle;
pub mod checksum;
pub mod fetch;
pub mod naming;

pub use bundle::{create_bundle, extract_all, extract_entry, BundleError};
pub use checksum::{hex_digest, ChecksumAlgorithm, ChecksumError};
pub use fetch::{fetch_and_verify, FetchError};
