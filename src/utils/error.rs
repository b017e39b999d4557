//! Error types for the fetch and storage paths
//!
//! This module defines custom error types used throughout the application.

use thiserror::Error;

/// Marker text the platform attaches to transport failures once the
/// per-cycle outbound call ceiling has been reached.
const QUOTA_MARKER: &str = "too many subrequests";

/// Errors that can occur during an outbound provider call
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status code
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Payload could not be decoded
    #[error("Decoding error: {0}")]
    Decode(String),

    /// Outbound call ceiling for this cycle reached
    #[error("Outbound call quota exhausted")]
    QuotaExhausted,

    /// Provider secret is not configured
    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    /// Upstream answered but rejected the request
    #[error("Upstream rejected request: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Whether this is the cycle-wide quota signal
    pub fn is_quota_exhausted(&self) -> bool {
        matches!(self, Self::QuotaExhausted)
    }

    /// Whether a failure of this kind only costs the current sub-device
    pub fn is_recoverable(&self) -> bool {
        !self.is_quota_exhausted()
    }

    /// Classify a transport error, promoting quota failures to [`FetchError::QuotaExhausted`]
    pub fn from_transport(err: reqwest::Error) -> Self {
        if error_chain_mentions_quota(&err) {
            Self::QuotaExhausted
        } else if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Http(err)
        }
    }
}

/// Walk an error chain looking for the platform quota marker
pub fn error_chain_mentions_quota(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if e.to_string().to_lowercase().contains(QUOTA_MARKER) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Errors raised by the persistent store
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Column encoding failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem failure while opening the store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Store connection lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}
