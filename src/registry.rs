//! Authoritative state of every job known to a queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constraint::ConstraintGate;
use crate::status::{StatusChannel, StatusStream};
use crate::{JobDescriptor, JobError, JobId, JobMode, JobState, Outcome};

/// Due time used when `now + interval` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// A job moved to `Running` and handed to a worker.
pub(crate) struct Claim {
    pub(crate) id: JobId,
    pub(crate) descriptor: Arc<JobDescriptor>,
    pub(crate) cancellation_token: CancellationToken,
}

/// Data only needed while a job can still run.
struct ActiveJob {
    descriptor: Arc<JobDescriptor>,
    cancellation_token: CancellationToken,
    due_at: Instant,
    seq: u64,
}

struct Entry {
    state: JobState,
    mode: JobMode,
    /// `None` once the job reached a terminal state.
    active: Option<ActiveJob>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<JobId, Entry>,
    status: StatusChannel,
    next_seq: u64,
}

impl Inner {
    fn transition(&mut self, id: JobId, state: JobState) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state = state;
        let terminal = state.is_terminal(&entry.mode);
        if terminal {
            entry.active = None;
        }
        self.status.publish(id, state, terminal);
    }
}

/// Registry of jobs and their states.
///
/// All state changes go through this type; transitions are published to
/// subscribers while the registry lock is held, so each subscriber sees the
/// transitions of one job in the order they happened.
///
/// Terminal jobs leave the active set but keep a tombstone with their final
/// state, so `get` and `cancel` keep answering until [`forget`](Self::forget).
#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
    work_available: Notify,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job as `Queued` and return its new id.
    pub async fn enqueue(&self, descriptor: JobDescriptor) -> JobId {
        let id = JobId::generate();
        let mut inner = self.inner.lock().await;

        let seq = inner.next_seq;
        inner.next_seq += 1;

        info!(
            job_id = %id,
            job_name = descriptor.job_name(),
            mode = ?descriptor.job_mode(),
            "Job enqueued"
        );

        inner.entries.insert(
            id,
            Entry {
                state: JobState::Queued,
                mode: *descriptor.job_mode(),
                active: Some(ActiveJob {
                    descriptor: Arc::new(descriptor),
                    cancellation_token: CancellationToken::new(),
                    due_at: Instant::now(),
                    seq,
                }),
            },
        );
        inner.transition(id, JobState::Queued);
        drop(inner);

        self.work_available.notify_one();
        id
    }

    /// Cancel a queued or running job.
    ///
    /// Queued jobs are never dispatched afterwards. Running handlers see the
    /// request through [`JobContext::is_cancelled`](crate::JobContext::is_cancelled)
    /// and their outcome is discarded. Cancelling a terminal job does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] if the id is not in the registry.
    pub async fn cancel(&self, id: JobId) -> Result<(), JobError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get(&id).ok_or(JobError::UnknownJobId(id))?;

        match entry.state {
            previous @ (JobState::Queued | JobState::Running) => {
                if let Some(active) = entry.active.as_ref() {
                    active.cancellation_token.cancel();
                }
                info!(job_id = %id, %previous, "Job cancelled");
                inner.transition(id, JobState::Cancelled);
            }
            state => {
                debug!(job_id = %id, %state, "Cancel ignored for finished job");
            }
        }
        Ok(())
    }

    /// Current state of a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] if the id is not in the registry.
    pub async fn get(&self, id: JobId) -> Result<JobState, JobError> {
        let inner = self.inner.lock().await;
        inner
            .entries
            .get(&id)
            .map(|entry| entry.state)
            .ok_or(JobError::UnknownJobId(id))
    }

    /// Follow the state transitions of a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] if the id is not in the registry.
    pub async fn subscribe(&self, id: JobId) -> Result<StatusStream, JobError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get(&id).ok_or(JobError::UnknownJobId(id))?;
        let (state, terminal) = (entry.state, entry.state.is_terminal(&entry.mode));
        Ok(inner.status.subscribe(id, state, terminal))
    }

    /// Drop the record of a finished job.
    ///
    /// Returns `false` and keeps the record if the job can still run.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::UnknownJobId`] if the id is not in the registry.
    pub async fn forget(&self, id: JobId) -> Result<bool, JobError> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get(&id).ok_or(JobError::UnknownJobId(id))?;
        if entry.active.is_some() {
            return Ok(false);
        }
        inner.entries.remove(&id);
        Ok(true)
    }

    /// Number of records, finished jobs included.
    #[must_use = "this returns the count, it doesn't modify the registry"]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Check if the registry has no records at all.
    #[must_use = "this returns a boolean, it doesn't modify the registry"]
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    /// Number of jobs that can still run.
    #[must_use = "this returns the count, it doesn't modify the registry"]
    pub async fn active_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .entries
            .values()
            .filter(|entry| entry.active.is_some())
            .count()
    }

    /// Claim the oldest due `Queued` job whose constraints hold.
    ///
    /// Jobs with unmet constraints stay `Queued` untouched.
    pub(crate) async fn claim_next(&self, gate: &ConstraintGate) -> Option<Claim> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let (_, id) = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == JobState::Queued)
            .filter_map(|(id, entry)| entry.active.as_ref().map(|active| (id, active)))
            .filter(|(_, active)| active.due_at <= now)
            .filter(|(id, active)| {
                let satisfied = gate.is_satisfied(active.descriptor.constraints());
                if !satisfied {
                    debug!(job_id = %id, "Constraints unmet, job stays queued");
                }
                satisfied
            })
            .map(|(id, active)| (active.seq, *id))
            .min_by_key(|(seq, _)| *seq)?;

        let active = inner.entries.get(&id)?.active.as_ref()?;
        let claim = Claim {
            id,
            descriptor: Arc::clone(&active.descriptor),
            cancellation_token: active.cancellation_token.clone(),
        };
        inner.transition(id, JobState::Running);
        Some(claim)
    }

    /// Apply the outcome of a finished handler invocation.
    ///
    /// The outcome is discarded if the job is no longer `Running`, which only
    /// happens when it was cancelled while the handler ran.
    pub(crate) async fn complete(&self, id: JobId, outcome: Outcome) {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.entries.get_mut(&id) else {
            warn!(job_id = %id, "Outcome for unknown job");
            return;
        };
        if entry.state != JobState::Running {
            debug!(job_id = %id, state = %entry.state, ?outcome, "Discarding outcome");
            return;
        }

        let mode = entry.mode;
        match outcome {
            Outcome::Success => {
                info!(job_id = %id, "Job succeeded");
                inner.transition(id, JobState::Succeeded);
            }
            Outcome::Failure(reason) => {
                warn!(job_id = %id, %reason, "Job failed");
                inner.transition(id, JobState::Failed);
            }
            Outcome::Retry => {
                info!(job_id = %id, "Job asked to be retried");
                inner.transition(id, JobState::Queued);
                drop(inner);
                self.work_available.notify_one();
                return;
            }
        }

        if let JobMode::Periodic(interval) = mode {
            if let Some(active) = inner.entries.get_mut(&id).and_then(|e| e.active.as_mut()) {
                active.due_at = next_due(Instant::now(), interval.get());
            }
            debug!(job_id = %id, next_in = ?interval.get(), "Periodic job re-queued");
            inner.transition(id, JobState::Queued);
        }
    }

    /// Wait until new work is enqueued or the timeout expires.
    pub(crate) async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.work_available.notified()).await;
    }
}

fn next_due(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{Connectivity, NetworkMonitor};
    use crate::{Constraint, HandlerError, JobContext};
    use futures::StreamExt;

    fn succeed(_ctx: &JobContext) -> Result<Outcome, HandlerError> {
        Ok(Outcome::Success)
    }

    fn online() -> ConstraintGate {
        ConstraintGate::new(Arc::new(NetworkMonitor::connected()))
    }

    // =========================================================================
    // Enqueue / Get Tests
    // =========================================================================

    #[tokio::test]
    async fn enqueue_starts_queued() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Queued));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn get_unknown_id_is_an_error() {
        let registry = JobRegistry::new();
        let id = JobId::generate();
        assert_eq!(registry.get(id).await, Err(JobError::UnknownJobId(id)));
    }

    // =========================================================================
    // Claim / Complete Tests
    // =========================================================================

    #[tokio::test]
    async fn claims_follow_enqueue_order() {
        let registry = JobRegistry::new();
        let gate = online();
        let first = registry.enqueue(JobDescriptor::new(succeed)).await;
        let second = registry.enqueue(JobDescriptor::new(succeed)).await;

        assert_eq!(registry.claim_next(&gate).await.map(|c| c.id), Some(first));
        assert_eq!(registry.claim_next(&gate).await.map(|c| c.id), Some(second));
        assert!(registry.claim_next(&gate).await.is_none());
    }

    #[tokio::test]
    async fn running_job_is_not_claimed_twice() {
        let registry = JobRegistry::new();
        let gate = online();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        let claim = registry.claim_next(&gate).await.unwrap();
        assert_eq!(claim.id, id);
        assert_eq!(registry.get(id).await, Ok(JobState::Running));
        assert!(registry.claim_next(&gate).await.is_none());
    }

    #[tokio::test]
    async fn unmet_constraint_keeps_job_queued() {
        let registry = JobRegistry::new();
        let monitor = NetworkMonitor::new(Connectivity::Disconnected);
        let gate = ConstraintGate::new(Arc::new(monitor.clone()));
        let id = registry
            .enqueue(JobDescriptor::new(succeed).constraint(Constraint::RequiresNetwork))
            .await;
        let mut stream = registry.subscribe(id).await.unwrap();

        for _ in 0..100 {
            assert!(registry.claim_next(&gate).await.is_none());
        }
        assert_eq!(registry.get(id).await, Ok(JobState::Queued));

        monitor.set(Connectivity::Connected);
        assert_eq!(registry.claim_next(&gate).await.map(|c| c.id), Some(id));

        assert_eq!(stream.recv().await, Some(JobState::Queued));
        assert_eq!(stream.recv().await, Some(JobState::Running));
    }

    #[tokio::test]
    async fn one_shot_success_is_terminal() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;
        let stream = registry.subscribe(id).await.unwrap();

        registry.claim_next(&online()).await.unwrap();
        registry.complete(id, Outcome::Success).await;

        let states: Vec<_> = stream.collect().await;
        assert_eq!(
            states,
            vec![JobState::Queued, JobState::Running, JobState::Succeeded]
        );
        assert_eq!(registry.active_count().await, 0);
        assert_eq!(registry.get(id).await, Ok(JobState::Succeeded));
    }

    #[tokio::test]
    async fn failure_is_terminal_for_one_shot() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        registry.claim_next(&online()).await.unwrap();
        registry.complete(id, Outcome::Failure("boom".into())).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Failed));
        assert!(registry.claim_next(&online()).await.is_none());
    }

    #[tokio::test]
    async fn retry_requeues_immediately() {
        let registry = JobRegistry::new();
        let gate = online();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        registry.claim_next(&gate).await.unwrap();
        registry.complete(id, Outcome::Retry).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Queued));
        assert_eq!(registry.claim_next(&gate).await.map(|c| c.id), Some(id));
    }

    #[tokio::test]
    async fn periodic_job_cycles_back_to_queued() {
        let registry = JobRegistry::new();
        let gate = online();
        let id = registry
            .enqueue(JobDescriptor::new(succeed).mode(JobMode::periodic(Duration::from_secs(60))))
            .await;
        let mut stream = registry.subscribe(id).await.unwrap();

        registry.claim_next(&gate).await.unwrap();
        registry.complete(id, Outcome::Failure("offline".into())).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Queued));
        // Next cycle is a full interval away.
        assert!(registry.claim_next(&gate).await.is_none());

        for expected in [
            JobState::Queued,
            JobState::Running,
            JobState::Failed,
            JobState::Queued,
        ] {
            assert_eq!(stream.recv().await, Some(expected));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_job_is_due_after_interval() {
        let registry = JobRegistry::new();
        let gate = online();
        let id = registry
            .enqueue(JobDescriptor::new(succeed).mode(JobMode::periodic(Duration::from_secs(60))))
            .await;

        registry.claim_next(&gate).await.unwrap();
        registry.complete(id, Outcome::Success).await;

        tokio::time::advance(Duration::from_secs(14 * 60)).await;
        assert!(registry.claim_next(&gate).await.is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(registry.claim_next(&gate).await.map(|c| c.id), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_interval_does_not_overflow() {
        let registry = JobRegistry::new();
        let gate = online();
        let id = registry
            .enqueue(JobDescriptor::new(succeed).mode(JobMode::periodic(Duration::from_secs(u64::MAX))))
            .await;

        registry.claim_next(&gate).await.unwrap();
        registry.complete(id, Outcome::Success).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Queued));
        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(registry.claim_next(&gate).await.is_none());
        assert!(registry.cancel(id).await.is_ok());
        assert_eq!(registry.get(id).await, Ok(JobState::Cancelled));
    }

    // =========================================================================
    // Cancel Tests
    // =========================================================================

    #[tokio::test]
    async fn cancel_unknown_id_leaves_others_alone() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;
        let stranger = JobId::generate();

        assert_eq!(
            registry.cancel(stranger).await,
            Err(JobError::UnknownJobId(stranger))
        );
        assert_eq!(registry.get(id).await, Ok(JobState::Queued));
    }

    #[tokio::test]
    async fn cancelled_queued_job_is_never_claimed() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        registry.cancel(id).await.unwrap();

        assert_eq!(registry.get(id).await, Ok(JobState::Cancelled));
        assert!(registry.claim_next(&online()).await.is_none());
    }

    #[tokio::test]
    async fn cancel_running_job_discards_late_outcome() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;
        let stream = registry.subscribe(id).await.unwrap();

        let claim = registry.claim_next(&online()).await.unwrap();
        registry.cancel(id).await.unwrap();
        assert!(claim.cancellation_token.is_cancelled());

        registry.complete(id, Outcome::Success).await;

        assert_eq!(registry.get(id).await, Ok(JobState::Cancelled));
        let states: Vec<_> = stream.collect().await;
        assert_eq!(
            states,
            vec![JobState::Queued, JobState::Running, JobState::Cancelled]
        );
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        registry.cancel(id).await.unwrap();
        registry.cancel(id).await.unwrap();
        assert_eq!(registry.get(id).await, Ok(JobState::Cancelled));
    }

    #[tokio::test]
    async fn cancel_after_success_is_a_no_op() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;
        registry.claim_next(&online()).await.unwrap();
        registry.complete(id, Outcome::Success).await;

        registry.cancel(id).await.unwrap();
        assert_eq!(registry.get(id).await, Ok(JobState::Succeeded));
    }

    // =========================================================================
    // Forget Tests
    // =========================================================================

    #[tokio::test]
    async fn forget_only_drops_finished_jobs() {
        let registry = JobRegistry::new();
        let id = registry.enqueue(JobDescriptor::new(succeed)).await;

        assert_eq!(registry.forget(id).await, Ok(false));

        registry.cancel(id).await.unwrap();
        assert_eq!(registry.forget(id).await, Ok(true));
        assert!(registry.is_empty().await);
        assert_eq!(registry.get(id).await, Err(JobError::UnknownJobId(id)));
    }

    #[tokio::test]
    async fn wait_for_work_wakes_on_enqueue() {
        let registry = Arc::new(JobRegistry::new());
        let waiter = Arc::clone(&registry);

        let start = std::time::Instant::now();
        let handle = tokio::spawn(async move {
            waiter.wait_for_work(Duration::from_secs(5)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.enqueue(JobDescriptor::new(succeed)).await;

        handle.await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
