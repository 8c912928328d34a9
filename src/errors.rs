//! Error taxonomy for the backfill pipeline.
//!
//! Two layers of errors exist:
//!
//! - [`TransportError`]: the outcome of a single HTTP attempt. These are
//!   retried by [`crate::fetcher::RetryFetch`] and never leave the fetcher.
//! - [`BackfillError`]: terminal errors seen by the resolver and the driver.
//!
//! Propagation policy: `Network` is converted into fallback content by the
//! resolver, a `Storage`/`RecordMissing` on write is counted per record, and
//! only a `Storage` error during selection ends the run. `Parse` is a setup
//! error raised before any record is touched.

use thiserror::Error;

/// Failure of one HTTP attempt against the upstream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("upstream responded with status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Body(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if let Some(status) = e.status() {
            TransportError::Status(status.as_u16())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Terminal pipeline errors.
#[derive(Debug, Error)]
pub enum BackfillError {
    /// Retries exhausted for a fetch.
    #[error("network error fetching {url} after {attempts} attempt(s): {cause}")]
    Network {
        url: String,
        attempts: u32,
        cause: String,
    },

    /// The content selector is not valid CSS. HTML bodies themselves always
    /// parse.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// A content write matched no row.
    #[error("record {0} not found in store")]
    RecordMissing(String),

    /// Shutdown was requested while waiting.
    #[error("operation cancelled by shutdown request")]
    Cancelled,
}

impl BackfillError {
    /// Short machine-friendly label used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            BackfillError::Network { .. } => "network",
            BackfillError::Parse(_) => "parse",
            BackfillError::Storage(_) | BackfillError::RecordMissing(_) => "storage",
            BackfillError::Cancelled => "cancelled",
        }
    }
}
