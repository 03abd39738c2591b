//! The weather notification job.
//!
//! Reads the `city` input, fetches the current weather over the configured
//! [`HttpTransport`] and reports the result through a [`NotificationSink`].

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::http::{self, HttpError, HttpTransport};
use crate::{Constraint, Handler, HandlerError, JobContext, JobDescriptor, JobMode, Outcome};

/// Input key holding the city name.
pub const CITY_KEY: &str = "city";

/// Public endpoint queried when no other base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

/// Notification title used when the job fails.
pub const FAILURE_TITLE: &str = "Weather update failed";

const KELVIN_OFFSET: f64 = 273.0;

/// Receives the user-visible result of a job.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, title: &str, message: &str);
}

/// Sink that writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(%title, %message, "Notification");
    }
}

/// Errors that make one weather fetch fail.
#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("no city given")]
    MissingCity,

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("malformed weather payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("weather payload has no conditions")]
    NoConditions,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(rename = "weatherList", alias = "weather")]
    weather_list: Vec<Condition>,
    main: Readings,
}

#[derive(Debug, Deserialize)]
struct Condition {
    main: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct Readings {
    #[serde(alias = "temp")]
    temperature: f64,
}

/// Parsed current weather.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub condition: String,
    pub description: String,
    pub kelvin: f64,
}

impl WeatherReport {
    /// Parse a response body.
    ///
    /// # Errors
    ///
    /// Fails on invalid JSON, missing fields or an empty condition list.
    pub fn parse(body: &str) -> Result<Self, WeatherError> {
        let response: WeatherResponse = serde_json::from_str(body)?;
        let condition = response
            .weather_list
            .into_iter()
            .next()
            .ok_or(WeatherError::NoConditions)?;

        Ok(Self {
            condition: condition.main,
            description: condition.description,
            kelvin: response.main.temperature,
        })
    }

    /// Temperature in whole degrees Celsius, truncated.
    #[must_use]
    pub fn celsius(&self) -> i64 {
        (self.kelvin - KELVIN_OFFSET).trunc() as i64
    }
}

impl fmt::Display for WeatherReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}. {}°C",
            self.condition,
            self.description,
            self.celsius()
        )
    }
}

/// Handler fetching the weather for the `city` input.
#[derive(Clone)]
pub struct WeatherHandler {
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn NotificationSink>,
    base_url: String,
    api_key: String,
}

impl WeatherHandler {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn NotificationSink>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            sink,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// Query another endpoint with the same payload format.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build a network-constrained descriptor for `city`.
    pub fn descriptor(self, city: &str, mode: JobMode) -> JobDescriptor {
        JobDescriptor::new(self)
            .name("weather")
            .input(CITY_KEY, city)
            .mode(mode)
            .constraint(Constraint::RequiresNetwork)
    }

    fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherError> {
        let url = reqwest::Url::parse_with_params(
            &self.base_url,
            &[("q", city), ("appid", self.api_key.as_str())],
        )
        .map_err(|e| WeatherError::InvalidUrl(e.to_string()))?;

        let body = http::get_blocking(self.transport.as_ref(), url.as_str())?;
        WeatherReport::parse(&body)
    }
}

impl Handler for WeatherHandler {
    fn run(&self, ctx: &JobContext) -> Result<Outcome, HandlerError> {
        let city = ctx.input(CITY_KEY).map(str::trim).unwrap_or_default();
        let result = if city.is_empty() {
            Err(WeatherError::MissingCity)
        } else {
            self.fetch(city)
        };

        if ctx.is_cancelled() {
            info!(job_id = %ctx.id(), "Weather job cancelled, not notifying");
            return Ok(Outcome::Failure("cancelled".to_string()));
        }

        match result {
            Ok(report) => {
                info!(job_id = %ctx.id(), %city, %report, "Weather fetched");
                self.sink
                    .notify(&format!("Weather in {city}"), &report.to_string());
                Ok(Outcome::Success)
            }
            Err(e) => {
                warn!(job_id = %ctx.id(), %city, error = %e, "Weather fetch failed");
                let reason = e.to_string();
                self.sink.notify(FAILURE_TITLE, &reason);
                Ok(Outcome::Failure(reason))
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
