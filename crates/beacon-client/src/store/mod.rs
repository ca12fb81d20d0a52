//! Descriptor store capability
//!
//! The registration engine and the subscription watcher talk to the
//! coordination store only through [`DescriptorStore`]. A store hands out
//! leases, attaches keys to them, renews them through a keepalive stream and
//! reports key changes under a prefix through a watch stream.

pub mod memory;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use beacon_api::KeyValue;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::Result;

pub use memory::MemoryStore;

pub type LeaseId = i64;

/// A granted lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lease {
    pub id: LeaseId,
    /// Seconds the store keeps the lease without renewal
    pub ttl: i64,
}

/// Acknowledgement of one lease renewal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeepaliveResponse {
    pub id: LeaseId,
    pub ttl: i64,
}

/// Result of a non-blocking check of the keepalive stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeepalivePoll {
    /// Nothing delivered since the last check
    Pending,
    Ack(KeepaliveResponse),
    /// The store reported the lease gone
    Expired,
    /// The producer went away without a verdict
    Closed,
}

/// Renewal acknowledgements for one lease.
///
/// Producers send `Some(response)` per renewal and `None` once the lease is
/// gone. The stream is never time-bounded; it lives as long as the lease.
pub struct KeepaliveStream {
    lease_id: LeaseId,
    rx: mpsc::Receiver<Option<KeepaliveResponse>>,
}

impl KeepaliveStream {
    pub fn new(lease_id: LeaseId, rx: mpsc::Receiver<Option<KeepaliveResponse>>) -> Self {
        Self { lease_id, rx }
    }

    pub fn lease_id(&self) -> LeaseId {
        self.lease_id
    }

    pub fn poll(&mut self) -> KeepalivePoll {
        match self.rx.try_recv() {
            Ok(Some(resp)) => KeepalivePoll::Ack(resp),
            Ok(None) => KeepalivePoll::Expired,
            Err(TryRecvError::Empty) => KeepalivePoll::Pending,
            Err(TryRecvError::Disconnected) => KeepalivePoll::Closed,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Put,
    Delete,
}

/// One key change under a watched prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchKind,
    pub key: String,
    /// Empty for deletes
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
}

/// Key changes under a prefix, in store order. Ends when the store closes it.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl WatchStream {
    pub fn new(rx: mpsc::UnboundedReceiver<WatchEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for WatchStream {
    type Item = WatchEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Coordination store operations used by registration and subscription.
///
/// Callers bound every call except the keepalive stream with a timeout.
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Membership/liveness check.
    async fn probe(&self) -> Result<()>;

    /// Grant a lease; `None` when the store answered without one.
    async fn grant(&self, ttl: i64) -> Result<Option<Lease>>;

    async fn revoke(&self, lease_id: LeaseId) -> Result<()>;

    /// Write `key` attached to `lease_id`; the key vanishes with the lease.
    async fn put(&self, key: &str, value: Vec<u8>, lease_id: LeaseId) -> Result<()>;

    async fn keep_alive(&self, lease_id: LeaseId) -> Result<KeepaliveStream>;

    /// Every pair whose key starts with `prefix`, sorted by raw key bytes.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;
}
