//! Error types for the HTTP client.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`super::ArchiveClient`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connection, timeout, DNS) after retries exhausted.
    #[error("transport error calling {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The global rate gate is in a CAPTCHA cooldown; the request was never sent.
    #[error("global cooldown active, retry after {cooldown_until:?}")]
    Captcha { cooldown_until: Duration },

    /// A CAPTCHA challenge was detected in the response body.
    #[error("captcha challenge detected calling {url}")]
    CaptchaDetected { url: String },

    /// The requested resource does not exist upstream.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The response body did not match the expected shape.
    #[error("failed to parse response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The server returned a non-2xx, non-404 status.
    #[error("HTTP {status} calling {url}")]
    HttpStatus { url: String, status: u16 },

    /// A date-range parameter could not be resolved into query parameters.
    #[error(transparent)]
    InvalidDateRange(#[from] super::date_range::DateRangeError),
}
