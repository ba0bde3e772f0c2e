//! The task state machine, one module per operation.
//!
//! Tasks are plain structs borrowing shared state; lock acquisition is the
//! engine's job, so every `run` here assumes the caller already holds the
//! appropriate lock for the paths it touches. Expected failures never cross
//! the task boundary as panics: `run` methods catch, log, and report through
//! the progress traits.

pub mod check_pending;
pub mod clean;
pub mod delete;
pub mod retrieve;
pub mod store;
pub mod submit;

pub use check_pending::CheckPendingActionTask;
pub use clean::CleanDirectoryTask;
pub use delete::{DeleteSmallFileTask, DeleteVariant};
pub use retrieve::{RetrieveTask, RetrieveVariant};
pub use store::StoreSmallFileTask;
pub use submit::{SubmitArchiveTask, SubmitOutcome, SubmitVariant};
