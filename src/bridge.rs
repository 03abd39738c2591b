//! Turning a callback-style completion into a blocking return.
//!
//! Job handlers run synchronously: the queue records their outcome as soon as
//! [`Handler::run`](crate::Handler::run) returns. When the underlying I/O only
//! reports completion through a callback, the handler has to park its thread
//! until that callback fires:
//!
//! ```rust
//! use weather_job_queue::bridge;
//!
//! let (completer, completion) = bridge::completion();
//! std::thread::spawn(move || completer.complete(42));
//! assert_eq!(completion.wait().unwrap(), 42);
//! ```

use thiserror::Error;
use tokio::sync::oneshot;

/// Errors from waiting on a [`Completion`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The completer was dropped without ever delivering a value.
    #[error("completion callback was dropped without firing")]
    Abandoned,
}

/// Create a linked completer/completion pair.
#[must_use]
pub fn completion<T>() -> (Completer<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Completion { rx })
}

/// Sending half, handed to the callback.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<T>,
}

impl<T> Completer<T> {
    /// Deliver the result. Does nothing if the waiter is gone.
    pub fn complete(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// Receiving half, kept by the handler.
#[derive(Debug)]
pub struct Completion<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Completion<T> {
    /// Block the current thread until the completer fires.
    ///
    /// Must be called from a blocking context such as a job handler; it
    /// panics when called from inside an async task.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Abandoned`] if the completer was dropped unused.
    pub fn wait(self) -> Result<T, BridgeError> {
        self.rx.blocking_recv().map_err(|_| BridgeError::Abandoned)
    }
}

/// Start a callback-style operation and block until its callback fires.
///
/// `start` receives the callback to hand to the operation.
///
/// # Errors
///
/// Returns [`BridgeError::Abandoned`] if the operation dropped the callback
/// without calling it.
pub fn block_on_callback<T, F>(start: F) -> Result<T, BridgeError>
where
    T: Send + 'static,
    F: FnOnce(Box<dyn FnOnce(T) + Send + 'static>),
{
    let (completer, completion) = completion();
    start(Box::new(move |value| completer.complete(value)));
    completion.wait()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn wait_returns_value_fired_on_other_thread() {
        let (completer, completion) = completion();
        std::thread::spawn(move || completer.complete("done"));
        assert_eq!(completion.wait(), Ok("done"));
    }

    #[test]
    fn wait_blocks_until_callback_fires() {
        let delay = Duration::from_millis(100);
        let start = Instant::now();

        let value = block_on_callback(|callback| {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                callback(7);
            });
        });

        assert_eq!(value, Ok(7));
        assert!(start.elapsed() >= delay);
    }

    #[test]
    fn dropped_completer_is_reported() {
        let result: Result<u8, _> = block_on_callback(drop);
        assert_eq!(result, Err(BridgeError::Abandoned));
    }

    #[test]
    fn callback_fired_synchronously_is_not_lost() {
        let result = block_on_callback(|callback| callback("inline"));
        assert_eq!(result, Ok("inline"));
    }
}
