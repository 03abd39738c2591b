//! Handler execution on the blocking thread pool.

use std::time::Instant;

use tracing::{debug, error, warn};

use crate::{JobContext, JobDescriptor, Outcome};

/// Run one handler invocation and produce exactly one [`Outcome`].
///
/// The handler runs on tokio's blocking pool, so it may block its thread for
/// as long as its I/O takes. This future resolves only after the handler has
/// returned. Handler errors and panics are converted into
/// [`Outcome::Failure`]; nothing escapes this function.
pub(crate) async fn run(descriptor: &JobDescriptor, ctx: JobContext) -> Outcome {
    let handler = descriptor.handler();
    let job_id = ctx.id();
    let start_time = Instant::now();

    let result = tokio::task::spawn_blocking(move || handler.run(&ctx)).await;
    let elapsed = start_time.elapsed();

    match result {
        Ok(Ok(outcome)) => {
            debug!(job_id = %job_id, ?outcome, ?elapsed, "Handler returned");
            outcome
        }
        Ok(Err(e)) => {
            warn!(job_id = %job_id, error = %e, ?elapsed, "Handler returned an error");
            Outcome::Failure(e.to_string())
        }
        Err(e) => {
            error!(job_id = %job_id, error = %e, ?elapsed, "Handler panicked");
            Outcome::Failure(format!("handler panicked: {e}"))
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
