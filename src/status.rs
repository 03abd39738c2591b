//! Per-job broadcast of state transitions.

use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::{JobId, JobState};

/// Listener lists keyed by job id.
///
/// The channel never owns a job: it only remembers who is listening to which
/// id. It lives inside the registry lock, so every publish for one id happens
/// in the order the registry applied the transitions.
#[derive(Default)]
pub(crate) struct StatusChannel {
    listeners: HashMap<JobId, Vec<mpsc::UnboundedSender<JobState>>>,
}

impl StatusChannel {
    /// Register a listener, seeding it with the state current right now.
    ///
    /// When `current` is terminal the stream yields it once and ends.
    pub(crate) fn subscribe(&mut self, id: JobId, current: JobState, terminal: bool) -> StatusStream {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail.
        let _ = tx.send(current);
        if !terminal {
            self.listeners.entry(id).or_default().push(tx);
        }
        StatusStream { id, rx }
    }

    /// Deliver one transition to every listener of `id`.
    ///
    /// Listeners whose stream was dropped are pruned. A terminal state closes
    /// every remaining stream for the id.
    pub(crate) fn publish(&mut self, id: JobId, state: JobState, terminal: bool) {
        if terminal {
            if let Some(listeners) = self.listeners.remove(&id) {
                for listener in listeners {
                    let _ = listener.send(state);
                }
            }
            return;
        }

        if let Some(listeners) = self.listeners.get_mut(&id) {
            listeners.retain(|listener| listener.send(state).is_ok());
            if listeners.is_empty() {
                self.listeners.remove(&id);
            }
        }
    }

    #[cfg(test)]
    fn listener_count(&self, id: JobId) -> usize {
        self.listeners.get(&id).map_or(0, Vec::len)
    }
}

/// Ordered stream of the states of one job.
///
/// Yields the state at subscription time first, then every later transition.
/// Ends after a terminal state. Dropping it unsubscribes.
#[derive(Debug)]
pub struct StatusStream {
    id: JobId,
    rx: mpsc::UnboundedReceiver<JobState>,
}

impl StatusStream {
    /// The job this stream follows.
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Next state, or `None` once the job reached a terminal state.
    pub async fn recv(&mut self) -> Option<JobState> {
        self.rx.recv().await
    }
}

impl Stream for StatusStream {
    type Item = JobState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
