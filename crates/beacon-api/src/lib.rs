//! Beacon API - Descriptor data model and wire format
//!
//! This crate provides:
//! - `NodeDescriptor`, the record a node publishes and its peers consume
//! - Deterministic descriptor key derivation
//! - Node state values compared case-insensitively
//! - Raw key/value pairs returned by prefix reads

pub mod kv;
pub mod model;
pub mod state;

// Re-export commonly used types
pub use kv::KeyValue;
pub use model::*;
pub use state::NodeState;
