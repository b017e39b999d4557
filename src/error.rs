//! Unified error handling for the charger-status crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`ChargerErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Error returned by cycle construction and cycle runs

use thiserror::Error;

pub use crate::query::QueryError;
pub use crate::utils::error::{FetchError, StorageError};

/// Common trait for all charger-status error types
pub trait ChargerErrorTrait: std::error::Error {
    /// Check if this error is recoverable (the caller may carry on)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Upstream provider errors (timeout, bad status, malformed payload)
    Network,
    /// Platform outbound-call quota reached
    Quota,
    /// Storage and I/O errors
    Storage,
    /// Malformed caller input
    Client,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Quota => "quota",
            Self::Storage => "storage",
            Self::Client => "client",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

impl ChargerErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        FetchError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::QuotaExhausted => ErrorCategory::Quota,
            Self::MissingCredential(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

impl ChargerErrorTrait for StorageError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

impl ChargerErrorTrait for QueryError {
    fn is_recoverable(&self) -> bool {
        false
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_) => ErrorCategory::Storage,
            _ => ErrorCategory::Client,
        }
    }
}

/// Error returned by cycle construction and cycle runs
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client construction or provider fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ChargerErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_recoverable(),
            Self::Storage(e) => ChargerErrorTrait::is_recoverable(e),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Storage(e) => e.category(),
        }
    }
}

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        assert_eq!(Error::Fetch(FetchError::Timeout).category(), ErrorCategory::Network);
        assert_eq!(
            Error::Fetch(FetchError::QuotaExhausted).category(),
            ErrorCategory::Quota
        );
        assert_eq!(
            Error::Fetch(FetchError::MissingCredential("DLMM_TOKEN")).category(),
            ErrorCategory::Config
        );
        assert_eq!(
            Error::from(StorageError::Poisoned).category().as_str(),
            "storage"
        );
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::Fetch(FetchError::Status(500)).is_recoverable());
        assert!(!Error::Fetch(FetchError::QuotaExhausted).is_recoverable());
        assert!(!Error::Storage(StorageError::Poisoned).is_recoverable());
    }

    #[test]
    fn test_query_error_category() {
        assert_eq!(QueryError::DevidWithoutProvider.category(), ErrorCategory::Client);
        assert_eq!(
            QueryError::Storage(StorageError::Poisoned).category(),
            ErrorCategory::Storage
        );
    }
}
