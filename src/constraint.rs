//! Constraint evaluation and the connectivity collaborator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::Constraint;

/// Last known network state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Unknown,
}

/// Source of connectivity information consumed by the [`ConstraintGate`].
#[async_trait::async_trait]
pub trait ConnectivitySource: Send + Sync + 'static {
    /// Whether the device is online, or `None` when that is not known.
    fn is_connected(&self) -> Option<bool>;

    /// Wait until connectivity differs from `last_seen` or the timeout expires.
    ///
    /// Returns at once if the source already moved on from `last_seen`.
    /// Sources that can push change events should override this so queued
    /// jobs are re-evaluated as soon as the network comes back.
    async fn wait_for_change(&self, last_seen: Option<bool>, timeout: Duration) {
        if self.is_connected() != last_seen {
            return;
        }
        tokio::time::sleep(timeout).await;
    }
}

/// Connectivity flag fed by an external event source.
///
/// Every clone shares the same flag. Readers see a consistent value and
/// [`wait_for_change`](ConnectivitySource::wait_for_change) wakes on every
/// [`set`](Self::set) that changes it.
#[derive(Clone)]
pub struct NetworkMonitor {
    state: Arc<watch::Sender<Connectivity>>,
}

impl NetworkMonitor {
    #[must_use]
    pub fn new(initial: Connectivity) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
        }
    }

    /// A monitor that starts out connected.
    #[must_use]
    pub fn connected() -> Self {
        Self::new(Connectivity::Connected)
    }

    /// Record a connectivity event.
    pub fn set(&self, connectivity: Connectivity) {
        let changed = self.state.send_if_modified(|current| {
            if *current == connectivity {
                return false;
            }
            *current = connectivity;
            true
        });
        if changed {
            debug!(?connectivity, "Connectivity changed");
        }
    }

    #[must_use]
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(Connectivity::Unknown)
    }
}

#[async_trait::async_trait]
impl ConnectivitySource for NetworkMonitor {
    fn is_connected(&self) -> Option<bool> {
        match self.current() {
            Connectivity::Connected => Some(true),
            Connectivity::Disconnected => Some(false),
            Connectivity::Unknown => None,
        }
    }

    async fn wait_for_change(&self, last_seen: Option<bool>, timeout: Duration) {
        // Subscribe before comparing so a set() in between is not lost.
        let mut changes = self.state.subscribe();
        if self.is_connected() != last_seen {
            return;
        }
        // A timeout just means the caller re-evaluates on its normal tick.
        let _ = tokio::time::timeout(timeout, changes.changed()).await;
    }
}

/// Decides whether a job's constraints currently hold.
#[derive(Clone)]
pub struct ConstraintGate {
    connectivity: Arc<dyn ConnectivitySource>,
}

impl ConstraintGate {
    pub fn new(connectivity: Arc<dyn ConnectivitySource>) -> Self {
        Self { connectivity }
    }

    /// Returns `true` when every constraint holds.
    ///
    /// Unknown connectivity counts as not connected.
    #[must_use]
    pub fn is_satisfied(&self, constraints: &HashSet<Constraint>) -> bool {
        constraints.iter().all(|constraint| match constraint {
            Constraint::RequiresNetwork => self.connectivity.is_connected().unwrap_or(false),
        })
    }

    /// Current connectivity, as passed back to [`wait_for_change`](Self::wait_for_change).
    #[must_use]
    pub fn connectivity(&self) -> Option<bool> {
        self.connectivity.is_connected()
    }

    /// Wait until connectivity moved away from `last_seen`, or until `timeout`.
    pub async fn wait_for_change(&self, last_seen: Option<bool>, timeout: Duration) {
        self.connectivity.wait_for_change(last_seen, timeout).await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
