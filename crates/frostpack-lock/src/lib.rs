//! # frostpack-lock
//!
//! Named-lock coordination for the archival workspace.
//!
//! Every mutation of a building directory happens under a process-wide named
//! lock so that storage, submission, restoration and cleaning never race on
//! the same directory. Lock names are derived from the directory's path
//! relative to the workspace root, so two nodes working on different
//! directories proceed in parallel.
//!
//! Locks carry a time-to-live. Long-running holders (restore polling in
//! particular) renew the lease through [`WaitingLock`] before it lapses.

pub mod name;
pub mod service;
pub mod waiting;

pub use name::{lock_name, LockKind};
pub use service::{LocalLockService, LockService, LockServiceExt};
pub use waiting::WaitingLock;
