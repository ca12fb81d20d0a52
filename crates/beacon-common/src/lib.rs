//! Beacon Common - Shared constants, errors, and utilities
//!
//! This crate provides the foundational pieces used across all Beacon components:
//! - Registry key layout constants
//! - Well-known node states
//! - Configuration/validation error type
//! - Host helpers

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::BeaconError;
pub use utils::local_ip;

/// Namespace used when neither the caller nor the configuration provides one
pub const DEFAULT_NAMESPACE: &str = "voice";

/// First segment of every descriptor key: `registry.<namespace>.<service>.<id>`
pub const KEY_PREFIX: &str = "registry";

/// Separator between descriptor key segments
pub const KEY_SEPARATOR: char = '.';

/// Node is up but not accepting traffic yet
pub const STATE_NOT_READY: &str = "NOT_READY";

/// Node is serving and eligible for load balancing
pub const STATE_ONLINE: &str = "ONLINE";

/// Node is reachable by direct lookup but excluded from balanced selection
pub const STATE_BYPASS: &str = "BYPASS";

/// Build the key prefix that covers every node of `service_name` in `namespace`.
///
/// The trailing separator keeps `orders` from matching `orders-archive`.
pub fn service_prefix(namespace: &str, service_name: &str) -> String {
    format!(
        "{}{}{}{}{}{}",
        KEY_PREFIX, KEY_SEPARATOR, namespace, KEY_SEPARATOR, service_name, KEY_SEPARATOR
    )
}
