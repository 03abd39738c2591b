//! A background job queue with constraint-gated execution.
//!
//! Jobs are described by a [`JobDescriptor`]: a synchronous [`Handler`], string
//! input, a [`JobMode`] (one-shot or periodic) and a set of [`Constraint`]s.
//! The queue holds a job in [`JobState::Queued`] until its constraints hold,
//! runs the handler on the blocking thread pool and publishes every state
//! transition to subscribers.
//!
//! Built-in pieces:
//!
//! - [`NetworkMonitor`] - Connectivity flag fed by an external event source
//! - [`http::ReqwestTransport`] - Callback-style HTTP primitive
//! - [`weather::WeatherHandler`] - Fetches the weather for a city and notifies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  enqueue   ┌─────────────┐  claim   ┌──────────────┐
//! │ JobQueue     │───────────►│ JobRegistry │◄─────────│ worker tasks │
//! └──────────────┘            └──────┬──────┘          └──────┬───────┘
//!        ▲                           │ publish                │ spawn_blocking
//!        │ subscribe          ┌──────▼──────┐          ┌──────▼───────┐
//!        └────────────────────│ StatusStream│          │ Handler::run │
//!                             └─────────────┘          └──────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use weather_job_queue::http::ReqwestTransport;
//! use weather_job_queue::weather::{LogNotifier, WeatherHandler};
//! use weather_job_queue::{Connectivity, JobMode, JobQueue, NetworkMonitor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = NetworkMonitor::new(Connectivity::Connected);
//!
//!     let queue = JobQueue::builder()
//!         .workers(2)
//!         .poll_interval(Duration::from_millis(500))
//!         .connectivity(Arc::new(network.clone()))
//!         .build()?;
//!
//!     let handler = WeatherHandler::new(
//!         Arc::new(ReqwestTransport::new()?),
//!         Arc::new(LogNotifier),
//!         "api-key",
//!     );
//!     let id = queue.enqueue(handler.descriptor("Jakarta", JobMode::OneShot)).await;
//!
//!     let mut states = queue.subscribe(id).await?;
//!     while let Some(state) = states.recv().await {
//!         println!("{state}");
//!     }
//!
//!     queue.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod bridge;
mod constraint;
mod error;
pub mod http;
mod job;
mod queue;
mod registry;
mod runner;
mod status;
pub mod weather;

pub use constraint::{Connectivity, ConnectivitySource, ConstraintGate, NetworkMonitor};
pub use error::{HandlerError, JobError, JobQueueError};
pub use job::{
    Constraint, Handler, JobContext, JobDescriptor, JobId, JobInput, JobMode, JobState,
    MIN_PERIODIC_INTERVAL, Outcome, PeriodicInterval,
};
pub use queue::{JobQueue, JobQueueBuilder, JobQueueConfig};
pub use registry::JobRegistry;
pub use status::StatusStream;
