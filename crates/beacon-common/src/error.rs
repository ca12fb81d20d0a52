//! Error types for Beacon
//!
//! `BeaconError` covers failures that are detected synchronously, before any
//! background task is started: missing descriptor fields and malformed
//! configuration.

/// Application-specific error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BeaconError {
    #[error("required field '{0}' is empty")]
    MissingField(&'static str),

    #[error("configuration error: {0}")]
    ConfigError(String),
}
