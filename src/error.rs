//! Error types for the job queue crate.

use std::error::Error;

use thiserror::Error;

use crate::JobId;

/// Errors that can occur when configuring or shutting down the job queue.
#[derive(Debug, Error)]
pub enum JobQueueError {
    /// Queue requires at least one worker.
    #[error("Invalid configuration: workers must be greater than 0")]
    WorkersMustBePositive,

    /// Queue requires a non-zero poll interval.
    #[error("Invalid configuration: poll_interval must be greater than 0")]
    PollIntervalMustBePositive,

    /// A worker panicked during execution.
    #[error("Worker panicked: {reason}")]
    WorkerPanicked { reason: String },
}

/// Errors returned to callers that reference a job by id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// The id was never issued by this queue, or its record was forgotten.
    #[error("Unknown job id: {0}")]
    UnknownJobId(JobId),
}

/// Error type returned by job handlers.
///
/// The runner turns it into [`Outcome::Failure`](crate::Outcome::Failure)
/// using its `Display` output as the reason.
pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;
