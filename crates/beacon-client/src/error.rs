//! Client error types for Beacon

use beacon_common::BeaconError;

/// Error type for registration, subscription and store operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("store error: {0}")]
    Store(String),

    #[error("lease not granted")]
    LeaseNotGranted,

    #[error("lease {0} expired")]
    LeaseExpired(i64),

    #[error("keepalive stream for lease {0} closed")]
    KeepaliveClosed(i64),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("registration already started")]
    AlreadyStarted,

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Common(#[from] BeaconError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
