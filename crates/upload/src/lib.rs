//! Asynchronous multipart upload engine.
//!
//! An [`UploadTask`] streams one request body while the HTTP exchange
//! is in flight, reports coarse progress over a channel, and delivers
//! exactly one terminal [`UploadOutcome`] to the caller. A supervisor
//! task kills uploads whose progress stalls, and the [`UploadRegistry`]
//! lets other parts of the application cancel an upload by media id.

pub mod events;
pub mod outcome;
pub mod registry;
pub mod supervisor;
pub mod task;

// Re-export primary types for convenience.
pub use events::{
    PROGRESS_AWAITING, PROGRESS_DONE, PROGRESS_PARSING, PROGRESS_STREAM_LIMIT, PROGRESS_WAIT_CAP,
    UploadEvent,
};
pub use outcome::{CancelCause, UploadError, UploadOutcome};
pub use registry::UploadRegistry;
pub use supervisor::SupervisorConfig;
pub use task::{TaskState, UploadTask};

use std::sync::Arc;

/// Registers a task, starts it, and awaits its terminal outcome.
///
/// The task stays cancellable through its registry for as long as it
/// runs; it unregisters itself on termination.
pub async fn run_upload(task: Arc<UploadTask>) -> UploadOutcome {
    task.registry().register(task.clone());
    task.start();
    task.await_result().await
}
