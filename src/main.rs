use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use weather_job_queue::http::ReqwestTransport;
use weather_job_queue::weather::{DEFAULT_BASE_URL, LogNotifier, WeatherHandler};
use weather_job_queue::{Connectivity, JobMode, JobQueue, NetworkMonitor};

#[derive(Parser, Debug)]
#[clap(about = "Fetch the weather for a city in a background job")]
struct CliArgs {
    /// City to fetch the weather for.
    #[clap(long)]
    pub city: String,

    /// API key sent as the `appid` query parameter.
    #[clap(long, env = "WEATHER_API_KEY")]
    pub api_key: String,

    /// Weather endpoint.
    #[clap(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Repeat the fetch every N minutes (raised to 15 if lower) instead of once.
    #[clap(long)]
    pub every_minutes: Option<u64>,

    /// Number of queue workers.
    #[clap(long, default_value_t = 1)]
    pub workers: usize,

    /// Idle worker poll interval in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub poll_ms: u64,

    /// Request timeout in seconds.
    #[clap(long, default_value_t = 30)]
    pub timeout_secs: u64,
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    StopListening,
}

/// A failed signal listener must not be mistaken for an interrupt.
fn on_ctrl_c(result: std::io::Result<()>) -> Interrupt {
    match result {
        Ok(()) => Interrupt::Cancel,
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            Interrupt::StopListening
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install log subscriber")?;

    // This binary has no platform connectivity events to listen to.
    let network = NetworkMonitor::new(Connectivity::Connected);

    let queue = JobQueue::builder()
        .workers(cli_args.workers)
        .poll_interval(Duration::from_millis(cli_args.poll_ms))
        .connectivity(Arc::new(network))
        .build()
        .context("Invalid queue configuration")?;

    let transport = ReqwestTransport::with_timeout(Duration::from_secs(cli_args.timeout_secs))
        .context("Failed to create HTTP client")?;
    let handler = WeatherHandler::new(Arc::new(transport), Arc::new(LogNotifier), cli_args.api_key)
        .base_url(cli_args.base_url);

    let mode = match cli_args.every_minutes {
        Some(minutes) => JobMode::periodic(Duration::from_secs(minutes.saturating_mul(60))),
        None => JobMode::OneShot,
    };
    let id = queue.enqueue(handler.descriptor(&cli_args.city, mode)).await;
    let mut states = queue.subscribe(id).await?;

    let mut listen_for_ctrl_c = true;
    loop {
        tokio::select! {
            state = states.recv() => match state {
                Some(state) => info!(job_id = %id, %state, "Job state changed"),
                None => break,
            },
            result = tokio::signal::ctrl_c(), if listen_for_ctrl_c => match on_ctrl_c(result) {
                Interrupt::Cancel => {
                    info!("Interrupted, cancelling job");
                    queue.cancel(id).await?;
                }
                Interrupt::StopListening => listen_for_ctrl_c = false,
            },
        }
    }

    queue.shutdown().await?;
    Ok(())
}
