//! Subscription to peer services
//!
//! [`SubscriptionCache`] mirrors the live nodes of every subscribed service;
//! the watcher keeps it current and the query methods read it.

pub mod cache;
mod query;
pub mod watcher;

pub use cache::{CacheChange, NodeEntry, SubscriptionCache};
pub use watcher::{SubscriptionHandle, start_subscription};
