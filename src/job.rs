//! Job descriptors, states and the handler contract.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::HandlerError;

/// Smallest interval a periodic job may run at.
pub const MIN_PERIODIC_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Opaque identifier of one enqueued job.
///
/// Ids are only handed out by [`JobQueue::enqueue`](crate::JobQueue::enqueue),
/// so there is nothing to cancel or observe before a job exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Interval between two runs of a periodic job, never below [`MIN_PERIODIC_INTERVAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodicInterval(Duration);

impl PeriodicInterval {
    /// Create an interval, silently raising anything shorter than the minimum.
    #[must_use]
    pub fn new(requested: Duration) -> Self {
        if requested < MIN_PERIODIC_INTERVAL {
            debug!(
                requested_secs = requested.as_secs(),
                "Periodic interval raised to the minimum"
            );
            return Self(MIN_PERIODIC_INTERVAL);
        }
        Self(requested)
    }

    /// The effective interval.
    #[must_use]
    pub fn get(self) -> Duration {
        self.0
    }
}

/// How often a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobMode {
    /// Run once; the first `Succeeded` or `Failed` is terminal.
    OneShot,
    /// Run every interval until cancelled.
    Periodic(PeriodicInterval),
}

impl JobMode {
    /// Shorthand for `JobMode::Periodic(PeriodicInterval::new(interval))`.
    #[must_use]
    pub fn periodic(interval: Duration) -> Self {
        Self::Periodic(PeriodicInterval::new(interval))
    }
}

/// Precondition that must hold before a job is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constraint {
    /// The connectivity source must report a connection.
    RequiresNetwork,
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether no further transition can follow this state for a job in `mode`.
    #[must_use]
    pub fn is_terminal(self, mode: &JobMode) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Succeeded | Self::Failed => matches!(mode, JobMode::OneShot),
            Self::Queued | Self::Running => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
    /// Put the job back in the queue without counting this cycle.
    Retry,
}

/// String key/value input handed to a handler.
pub type JobInput = BTreeMap<String, String>;

/// Per-invocation context given to [`Handler::run`].
#[derive(Debug, Clone)]
pub struct JobContext {
    id: JobId,
    input: Arc<JobInput>,
    cancellation_token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        id: JobId,
        input: Arc<JobInput>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            id,
            input,
            cancellation_token,
        }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Look up one input value.
    #[must_use]
    pub fn input(&self, key: &str) -> Option<&str> {
        self.input.get(key).map(String::as_str)
    }

    /// Check if cancellation has been requested.
    ///
    /// Cancellation never interrupts a handler; long-running handlers should
    /// check this at safe points and return early.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// Unit of work executed by the queue.
///
/// `run` is called on a blocking thread and must only return once the work is
/// actually finished: the queue records the outcome as soon as it returns.
/// Handlers built on callback-style I/O have to wait for the callback, for
/// example with [`bridge::completion`](crate::bridge::completion), instead of
/// returning while the request is still in flight.
///
/// # Example
///
/// ```rust
/// use weather_job_queue::{Handler, HandlerError, JobContext, Outcome};
///
/// struct Greet;
///
/// impl Handler for Greet {
///     fn run(&self, ctx: &JobContext) -> Result<Outcome, HandlerError> {
///         let name = ctx.input("name").ok_or("missing name")?;
///         println!("hello {name}");
///         Ok(Outcome::Success)
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Execute one cycle of the job.
    fn run(&self, ctx: &JobContext) -> Result<Outcome, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&JobContext) -> Result<Outcome, HandlerError> + Send + Sync + 'static,
{
    fn run(&self, ctx: &JobContext) -> Result<Outcome, HandlerError> {
        self(ctx)
    }
}

/// Immutable description of one job.
#[derive(Clone)]
pub struct JobDescriptor {
    name: String,
    handler: Arc<dyn Handler>,
    input: Arc<JobInput>,
    mode: JobMode,
    constraints: HashSet<Constraint>,
}

impl JobDescriptor {
    /// Start a one-shot, unconstrained descriptor with no input.
    pub fn new(handler: impl Handler) -> Self {
        Self {
            name: "job".to_string(),
            handler: Arc::new(handler),
            input: Arc::new(JobInput::new()),
            mode: JobMode::OneShot,
            constraints: HashSet::new(),
        }
    }

    /// Name used in log output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add one input value.
    #[must_use]
    pub fn input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.input).insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: JobMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.insert(constraint);
        self
    }

    pub fn job_name(&self) -> &str {
        &self.name
    }

    pub fn job_mode(&self) -> &JobMode {
        &self.mode
    }

    pub fn constraints(&self) -> &HashSet<Constraint> {
        &self.constraints
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        Arc::clone(&self.handler)
    }

    pub(crate) fn shared_input(&self) -> Arc<JobInput> {
        Arc::clone(&self.input)
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("mode", &self.mode)
            .field("constraints", &self.constraints)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
