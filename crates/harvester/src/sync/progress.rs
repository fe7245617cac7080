//! Progress reporting types for harvest runs.
//!
//! The library never prints. It emits [`HarvestProgress`] events through an
//! optional callback and the CLI decides how to render them.

use super::types::{CompletionReason, Stream};
use crate::sink::Table;

/// Progress events emitted while harvesting.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum HarvestProgress {
    /// A job is starting (or resuming).
    JobStarted {
        stream: Stream,
        /// Items already collected by earlier runs.
        collected: usize,
        /// Configured item cap for the stream.
        target: usize,
    },

    /// The checkpoint already holds `target` items; nothing to do.
    AlreadyAtLimit {
        stream: Stream,
        collected: usize,
        target: usize,
    },

    /// An item was committed to the checkpoint.
    ItemCollected {
        stream: Stream,
        /// Identifier of the item (sha, PR number, login).
        key: String,
        /// Running total including earlier runs.
        collected: usize,
        target: usize,
    },

    /// An item was filtered out or was already collected.
    ItemSkipped {
        stream: Stream,
        key: Option<String>,
        reason: String,
    },

    /// A single entity failed but the job carries on.
    EntityError {
        stream: Stream,
        key: String,
        error: String,
    },

    /// Stopped at the first item older than the lookback cutoff.
    CutoffReached { stream: Stream, key: String },

    /// Waiting for the rate-limit window to reset before the next call.
    RateLimitWait { wait_secs: u64 },

    /// A call was rejected for rate-limit reasons and will be retried.
    RateLimitRetry { url: String, attempt: u32 },

    /// A batch of records was appended to a table.
    BatchWritten { table: Table, count: usize },

    /// A job finished.
    JobCompleted {
        stream: Stream,
        /// Items collected during this run.
        collected: usize,
        /// Running total including earlier runs.
        total: usize,
        reason: CompletionReason,
    },

    /// A job aborted; the run continues with the next job.
    JobFailed { stream: Stream, error: String },

    /// Warning message (non-fatal).
    Warning { message: String },
}

/// Progress callback for harvest operations.
pub type ProgressCallback = Box<dyn Fn(HarvestProgress) + Send + Sync>;

/// Emit a progress event if a callback is registered.
#[inline]
pub fn emit(callback: Option<&ProgressCallback>, event: HarvestProgress) {
    if let Some(cb) = callback {
        cb(event);
    }
}
