//! HTTP collaborator used by job handlers.

use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use crate::bridge::{self, BridgeError};

/// Default request timeout of [`ReqwestTransport`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from performing a request.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("request was dropped before completing")]
    Abandoned,

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl From<BridgeError> for HttpError {
    fn from(_: BridgeError) -> Self {
        Self::Abandoned
    }
}

/// Callback fired exactly once with the response body or the error.
pub type ResponseCallback = Box<dyn FnOnce(Result<String, HttpError>) + Send + 'static>;

/// Callback-style GET primitive.
///
/// `get` starts the request and returns immediately; `on_complete` fires later,
/// possibly on another thread. Handlers must not return before it fired; use
/// [`get_blocking`] to wait for it.
pub trait HttpTransport: Send + Sync + 'static {
    fn get(&self, url: &str, on_complete: ResponseCallback);
}

/// Perform a GET and block the calling thread until the response arrives.
///
/// # Errors
///
/// Returns whatever error the transport reported, or
/// [`HttpError::Abandoned`] if it never called back.
pub fn get_blocking(transport: &dyn HttpTransport, url: &str) -> Result<String, HttpError> {
    bridge::block_on_callback(|callback| transport.get(url, callback))?
}

/// [`HttpTransport`] backed by an async `reqwest` client.
///
/// Requests are driven on the tokio runtime captured at construction; the
/// callback fires from a runtime task once the body has been read.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    runtime: Handle,
}

impl ReqwestTransport {
    /// Create a transport with the default timeout.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime or when the client cannot be
    /// built.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Create a transport whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime or when the client cannot be
    /// built.
    pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
        let runtime = Handle::try_current().map_err(|e| HttpError::Unavailable(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, runtime })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, on_complete: ResponseCallback) {
        let request = self.client.get(url);
        let url = url.to_string();

        self.runtime.spawn(async move {
            let result = async {
                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(HttpError::Status(status.as_u16()));
                }
                Ok::<_, HttpError>(response.text().await?)
            }
            .await;

            debug!(%url, ok = result.is_ok(), "Request completed");
            on_complete(result);
        });
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
