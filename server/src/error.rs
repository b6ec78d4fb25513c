//! Error types for the Astronomer server.
//!
//! # Error Types
//!
//! - [`StoreError`] - Failures reported by a [`UserStore`](crate::store::UserStore)
//! - [`ServerError`] - Top-level error encompassing configuration and store failures
//!
//! Store errors are never handled by the publication; they propagate to the
//! host that runs it.

use std::error::Error;
use std::fmt;

use thiserror::Error as ThisError;

pub use crate::config::ConfigError;

/// Errors reported by a user store.
#[derive(ThisError, Debug)]
pub enum StoreError {
    /// The backing store could not serve the request.
    #[error("user store unavailable: {0}")]
    Unavailable(String),

    /// A stored document could not be encoded or decoded.
    #[error("invalid user document: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates a new unavailable error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use astronomer_server::error::StoreError;
    ///
    /// let err = StoreError::unavailable("connection pool exhausted");
    /// assert!(matches!(err, StoreError::Unavailable(_)));
    /// ```
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

/// Top-level error type for the Astronomer server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error while resolving settings.
    Config(ConfigError),

    /// The user store failed while publishing or streaming.
    Store(StoreError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
