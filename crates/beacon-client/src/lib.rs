//! Beacon Client - lease-based service registration and discovery
//!
//! This crate provides:
//! - `DescriptorStore`, the coordination store capability, and an in-memory store
//! - The registration engine: connectivity gate, lease, publish, keepalive
//! - The subscription cache with its load-balancing queries
//! - Configuration loading and the `ServiceRegistry` facade

pub mod config;
pub mod error;
pub mod registration;
pub mod registry;
pub mod store;
pub mod subscription;

// Re-exports
pub use config::{PredefinedEndpoints, RegistryConfig};
pub use error::{ClientError, Result};
pub use registration::{
    NodeStateHandle, Phase, RegisterOptions, RegistrationHandle, start_registration,
};
pub use registry::ServiceRegistry;
pub use store::{DescriptorStore, MemoryStore};
pub use subscription::{NodeEntry, SubscriptionCache, SubscriptionHandle, start_subscription};
