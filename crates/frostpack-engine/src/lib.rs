//! # frostpack-engine
//!
//! The archival task engine: a synchronized state machine over a local
//! build workspace and a remote cold tier.
//!
//! ```text
//!   store request ──▶ zip/<node>/rs_zip_<stamp>_current/<file>
//!                          │ size or age threshold
//!                          ▼
//!                     rs_zip_<stamp>/            (closed)
//!                          │ submit sweep
//!                          ▼
//!                     remote: <node>/<stamp>.zip
//!                          │ retrieve / delete
//!                          ▼
//!                     tmp/<node>/rs_zip_<stamp>/ (restore cache)
//! ```
//!
//! Every task runs under a named lock from `frostpack-lock`; per-request
//! outcomes are reported through the progress traits, never by panicking or
//! aborting sibling tasks in a batch.

pub mod engine;
pub mod error;
pub mod progress;
pub mod request;
pub mod tasks;
pub mod workspace;

pub use engine::Engine;
pub use error::{EngineError, Result};
pub use progress::{DeletionProgress, PeriodicProgress, RestorationProgress, StorageProgress};
pub use request::{DeleteRequest, RetrieveRequest, StoreRequest};
pub use workspace::{SmallFileRef, Workspace};
