//! Error types for the Astronomer client.
//!
//! Tracking itself never fails: absent configuration, missing accounts or an
//! unknown router only degrade features. Errors are reserved for setup steps
//! the host asks for explicitly, such as reading settings from the
//! environment or building the HTTP sink.

use thiserror::Error;

use crate::config::ConfigError;
use crate::sink::SinkError;

/// Errors that can occur while setting up tracking.
#[derive(Error, Debug)]
pub enum AstronomerError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Analytics sink error.
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

/// A specialized `Result` type for client setup.
pub type Result<T> = std::result::Result<T, AstronomerError>;
