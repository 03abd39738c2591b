//! Job queue implementation with configurable workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::constraint::{ConnectivitySource, ConstraintGate, NetworkMonitor};
use crate::registry::JobRegistry;
use crate::status::StatusStream;
use crate::{JobContext, JobDescriptor, JobError, JobId, JobQueueError, JobState, runner};

/// Configuration for the job queue.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use weather_job_queue::JobQueueConfig;
///
/// // Use defaults
/// let config = JobQueueConfig::default();
///
/// // Or customize
/// let config = JobQueueConfig {
///     workers: 8,
///     poll_interval: Duration::from_millis(100),
/// };
/// ```
#[derive(Clone, Debug)]
pub struct JobQueueConfig {
    /// Number of concurrent worker tasks.
    ///
    /// Each worker runs at most one handler at a time, so this also caps how
    /// many handlers occupy the blocking pool.
    pub workers: usize,

    /// How long an idle worker waits before re-evaluating queued jobs.
    ///
    /// Workers also wake early on enqueue and on connectivity changes, so this
    /// mostly bounds how late a periodic job starts after it became due.
    pub poll_interval: Duration,
}

impl Default for JobQueueConfig {
    /// Returns a configuration with sensible defaults.
    ///
    /// - `workers`: 4
    /// - `poll_interval`: 1 second
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl JobQueueConfig {
    fn validate(&self) -> Result<(), JobQueueError> {
        if self.workers == 0 {
            return Err(JobQueueError::WorkersMustBePositive);
        }
        if self.poll_interval.is_zero() {
            return Err(JobQueueError::PollIntervalMustBePositive);
        }
        Ok(())
    }
}

/// Builder for [`JobQueue`].
#[must_use = "call build() to start the queue"]
pub struct JobQueueBuilder {
    config: JobQueueConfig,
    connectivity: Option<Arc<dyn ConnectivitySource>>,
}

impl Default for JobQueueBuilder {
    fn default() -> Self {
        Self {
            config: JobQueueConfig::default(),
            connectivity: None,
        }
    }
}

impl JobQueueBuilder {
    pub fn config(mut self, config: JobQueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    /// Connectivity source used for [`Constraint::RequiresNetwork`](crate::Constraint::RequiresNetwork).
    ///
    /// Defaults to a [`NetworkMonitor`] that reports connected.
    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivitySource>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Validate the configuration and spawn the workers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::WorkersMustBePositive`] or
    /// [`JobQueueError::PollIntervalMustBePositive`] on invalid configuration.
    #[must_use = "job queue must be stored to keep workers running"]
    pub fn build(self) -> Result<JobQueue, JobQueueError> {
        self.config.validate()?;

        let connectivity: Arc<dyn ConnectivitySource> = match self.connectivity {
            Some(connectivity) => connectivity,
            None => Arc::new(NetworkMonitor::connected()),
        };
        let gate = ConstraintGate::new(connectivity);
        let registry = Arc::new(JobRegistry::new());
        let (shutdown_tx, _) = broadcast::channel(1);

        let workers = (0..self.config.workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&registry),
                    gate.clone(),
                    self.config.poll_interval,
                    shutdown_tx.subscribe(),
                ))
            })
            .collect();

        info!(
            workers = self.config.workers,
            poll_interval = ?self.config.poll_interval,
            "Job queue started"
        );

        Ok(JobQueue {
            registry,
            workers,
            shutdown_tx,
        })
    }
}

async fn worker_loop(
    worker_id: usize,
    registry: Arc<JobRegistry>,
    gate: ConstraintGate,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    debug!(worker_id = worker_id, "Worker starting");

    loop {
        // Check for shutdown signal
        if shutdown_rx.try_recv().is_ok() {
            debug!(worker_id = worker_id, "Worker received shutdown signal");
            break;
        }

        let seen = gate.connectivity();
        match registry.claim_next(&gate).await {
            Some(claim) => {
                debug!(worker_id = worker_id, job_id = %claim.id, "Worker claimed job");

                let ctx = JobContext::new(
                    claim.id,
                    claim.descriptor.shared_input(),
                    claim.cancellation_token.clone(),
                );
                let outcome = runner::run(&claim.descriptor, ctx).await;
                registry.complete(claim.id, outcome).await;
            }
            None => {
                // Nothing runnable: wait for new work, a connectivity change or the next tick
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(worker_id = worker_id, "Worker received shutdown signal");
                        break;
                    }
                    () = registry.wait_for_work(poll_interval) => {}
                    () = gate.wait_for_change(seen, poll_interval) => {}
                }
            }
        }
    }

    debug!(worker_id = worker_id, "Worker shutting down");
}

/// Background job queue with constraint-gated dispatch.
///
/// The queue owns a [`JobRegistry`] and a pool of worker tasks. Each worker
/// claims the oldest runnable job, runs its handler on the blocking pool and
/// records the outcome.
///
/// # Lifecycle
///
/// 1. Create with [`JobQueue::builder`]
/// 2. [`enqueue`](Self::enqueue) jobs and follow them with [`subscribe`](Self::subscribe)
/// 3. Call [`JobQueue::shutdown`] to stop all workers
///
/// # Example
///
/// ```rust,no_run
/// use weather_job_queue::{HandlerError, JobContext, JobDescriptor, JobQueue, Outcome};
///
/// fn greet(ctx: &JobContext) -> Result<Outcome, HandlerError> {
///     println!("hello {}", ctx.input("name").unwrap_or("world"));
///     Ok(Outcome::Success)
/// }
///
/// # async fn example() -> Result<(), weather_job_queue::JobQueueError> {
/// let queue = JobQueue::builder().workers(2).build()?;
///
/// let id = queue.enqueue(JobDescriptor::new(greet).input("name", "Jakarta")).await;
/// let mut states = queue.subscribe(id).await.expect("id was just issued");
/// while let Some(state) = states.recv().await {
///     println!("{id}: {state}");
/// }
///
/// queue.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct JobQueue {
    registry: Arc<JobRegistry>,
    workers: Vec<JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobQueue {
    pub fn builder() -> JobQueueBuilder {
        JobQueueBuilder::default()
    }

    /// Add a job; it starts `Queued` and runs once its constraints hold.
    pub async fn enqueue(&self, descriptor: JobDescriptor) -> JobId {
        self.registry.enqueue(descriptor).await
    }

    /// Cancel a job. See [`JobRegistry::cancel`].
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] for ids this queue never issued.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        self.registry.cancel(id).await
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] for ids this queue never issued.
    pub async fn get(&self, id: JobId) -> Result<JobState, JobError> {
        self.registry.get(id).await
    }

    /// Stream the states of a job, starting with its current one.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] for ids this queue never issued.
    pub async fn subscribe(&self, id: JobId) -> Result<StatusStream, JobError> {
        self.registry.subscribe(id).await
    }

    /// Call `listener` with every state of a job until it is terminal.
    ///
    /// The returned handle finishes after the terminal state was delivered.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] for ids this queue never issued.
    pub async fn observe<F>(&self, id: JobId, mut listener: F) -> Result<JoinHandle<()>, JobError>
    where
        F: FnMut(JobState) + Send + 'static,
    {
        let mut stream = self.subscribe(id).await?;
        Ok(tokio::spawn(async move {
            while let Some(state) = stream.recv().await {
                listener(state);
            }
        }))
    }

    /// Drop the record of a finished job. See [`JobRegistry::forget`].
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] for ids this queue never issued.
    pub async fn forget(&self, id: JobId) -> Result<bool, JobError> {
        self.registry.forget(id).await
    }

    /// The registry backing this queue.
    #[must_use]
    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Gracefully shutdown the queue.
    ///
    /// This signals all workers to stop and waits for them to finish the
    /// handler they are currently running. Queued jobs are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`JobQueueError::WorkerPanicked`] if any worker panicked during
    /// execution.
    pub async fn shutdown(self) -> Result<(), JobQueueError> {
        // Send shutdown signal to all workers
        let _ = self.shutdown_tx.send(());

        // Wait for all workers to complete
        for (idx, handle) in self.workers.into_iter().enumerate() {
            handle.await.map_err(|e| JobQueueError::WorkerPanicked {
                reason: format!("Worker {idx} panicked: {e}"),
            })?;
        }

        info!("All workers shut down successfully");
        Ok(())
    }

    /// Attempt to shutdown an `Arc<JobQueue>` if it's the last reference.
    ///
    /// # Behavior
    ///
    /// - If this is the last `Arc` reference, shuts the queue down and awaits completion
    /// - If other references exist, logs a warning and returns without shutdown
    pub async fn shutdown_arc(self: Arc<Self>) {
        info!("Shutting down job queue...");
        match Arc::try_unwrap(self) {
            Ok(queue) => {
                if let Err(e) = queue.shutdown().await {
                    tracing::error!("Error shutting down job queue: {:?}", e);
                } else {
                    info!("Job queue shut down successfully");
                }
            }
            Err(_) => {
                tracing::warn!("Could not shutdown job queue - still has active references");
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
