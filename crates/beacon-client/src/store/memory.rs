//! In-process descriptor store
//!
//! A single-process stand-in for a lease-based coordination store: revisions,
//! leases with deadlines, prefix reads and prefix watches. Lapsed leases are
//! reaped in the background and their keys deleted with `Delete` events.
//!
//! Faults can be injected for tests: an unreachable probe, failing or empty
//! grants, failing puts and suspended keepalive renewal. Every successful
//! write is recorded so callers can assert on publish counts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use beacon_api::KeyValue;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{
    DescriptorStore, KeepaliveResponse, KeepaliveStream, Lease, LeaseId, WatchEvent, WatchKind,
    WatchStream,
};
use crate::error::{ClientError, Result};

const REAP_INTERVAL: Duration = Duration::from_millis(100);
const KEEPALIVE_BUFFER: usize = 16;

/// One successful write, as seen by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub lease_id: LeaseId,
    pub revision: i64,
}

struct Entry {
    value: Vec<u8>,
    create_revision: i64,
    mod_revision: i64,
    lease_id: LeaseId,
}

struct LeaseRecord {
    ttl: i64,
    deadline: Instant,
    keys: HashSet<String>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct Faults {
    unreachable: bool,
    failing_grants: usize,
    empty_grants: usize,
    failing_puts: usize,
    keepalive_suspended: bool,
}

#[derive(Default)]
struct StoreState {
    revision: i64,
    next_lease_id: LeaseId,
    kvs: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, LeaseRecord>,
    watchers: Vec<Watcher>,
    faults: Faults,
    puts: Vec<PutRecord>,
    grants: usize,
    revokes: usize,
}

impl StoreState {
    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|w| {
            if !event.key.starts_with(&w.prefix) {
                return !w.tx.is_closed();
            }
            w.tx.send(event.clone()).is_ok()
        });
    }

    fn delete_key(&mut self, key: &str) {
        if self.kvs.remove(key).is_some() {
            self.revision += 1;
            let event = WatchEvent {
                kind: WatchKind::Delete,
                key: key.to_string(),
                value: Vec::new(),
                create_revision: 0,
                mod_revision: self.revision,
            };
            self.notify(event);
        }
    }

    fn drop_lease(&mut self, lease_id: LeaseId) -> bool {
        match self.leases.remove(&lease_id) {
            Some(record) => {
                let mut keys: Vec<String> = record.keys.into_iter().collect();
                keys.sort();
                for key in keys {
                    self.delete_key(&key);
                }
                true
            }
            None => false,
        }
    }

    fn reap(&mut self, now: Instant) {
        let lapsed: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, record)| record.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease_id in lapsed {
            debug!(lease_id, "lease lapsed");
            self.drop_lease(lease_id);
        }
    }

    /// Extend the lease deadline; `None` when it no longer exists.
    fn renew(&mut self, lease_id: LeaseId, now: Instant) -> Option<KeepaliveResponse> {
        if self.faults.keepalive_suspended {
            return self.leases.get(&lease_id).map(|_| KeepaliveResponse {
                id: lease_id,
                ttl: 0,
            });
        }
        let record = self.leases.get_mut(&lease_id)?;
        record.deadline = now + Duration::from_secs(record.ttl as u64);
        Some(KeepaliveResponse {
            id: lease_id,
            ttl: record.ttl,
        })
    }
}

struct Inner {
    state: Mutex<StoreState>,
}

/// Single-process [`DescriptorStore`].
///
/// Must be created inside a Tokio runtime; the reaper task stops once the
/// last clone is dropped.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Arc::new(Inner {
            state: Mutex::new(StoreState {
                next_lease_id: 1,
                ..Default::default()
            }),
        });
        tokio::spawn(reap_loop(Arc::downgrade(&inner)));
        Self { inner }
    }

    /// Make `probe` fail (false) or succeed (true).
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state.lock().faults.unreachable = !reachable;
    }

    /// Fail the next `count` grants with an error.
    pub fn fail_next_grants(&self, count: usize) {
        self.inner.state.lock().faults.failing_grants = count;
    }

    /// Answer the next `count` grants without a lease.
    pub fn empty_next_grants(&self, count: usize) {
        self.inner.state.lock().faults.empty_grants = count;
    }

    pub fn fail_next_puts(&self, count: usize) {
        self.inner.state.lock().faults.failing_puts = count;
    }

    /// Stop renewing leases; keepalive streams keep acknowledging with ttl 0.
    pub fn suspend_keepalive(&self, suspended: bool) {
        self.inner.state.lock().faults.keepalive_suspended = suspended;
    }

    /// Drop a lease immediately, deleting its keys.
    pub fn expire_lease(&self, lease_id: LeaseId) -> bool {
        self.inner.state.lock().drop_lease(lease_id)
    }

    /// Close every open watch stream.
    pub fn close_watches(&self) {
        self.inner.state.lock().watchers.clear();
    }

    pub fn puts(&self) -> Vec<PutRecord> {
        self.inner.state.lock().puts.clone()
    }

    pub fn put_count(&self) -> usize {
        self.inner.state.lock().puts.len()
    }

    pub fn grant_count(&self) -> usize {
        self.inner.state.lock().grants
    }

    pub fn revoke_count(&self) -> usize {
        self.inner.state.lock().revokes
    }

    pub fn live_leases(&self) -> Vec<LeaseId> {
        let mut ids: Vec<LeaseId> = self.inner.state.lock().leases.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.state.lock().kvs.get(key).map(|e| e.value.clone())
    }

    pub fn revision(&self) -> i64 {
        self.inner.state.lock().revision
    }

    pub fn mod_revision(&self, key: &str) -> Option<i64> {
        self.inner.state.lock().kvs.get(key).map(|e| e.mod_revision)
    }
}

async fn reap_loop(inner: Weak<Inner>) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.state.lock().reap(Instant::now());
    }
}

async fn keepalive_loop(
    inner: Weak<Inner>,
    lease_id: LeaseId,
    period: Duration,
    tx: mpsc::Sender<Option<KeepaliveResponse>>,
) {
    loop {
        let renewed = {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let mut state = inner.state.lock();
            state.renew(lease_id, Instant::now())
        };

        match renewed {
            Some(resp) => {
                trace!(lease_id, "keepalive renewed");
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(Some(resp)) {
                    break;
                }
            }
            None => {
                let _ = tx.send(None).await;
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = tx.closed() => break,
        }
    }
}

#[async_trait]
impl DescriptorStore for MemoryStore {
    async fn probe(&self) -> Result<()> {
        if self.inner.state.lock().faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        Ok(())
    }

    async fn grant(&self, ttl: i64) -> Result<Option<Lease>> {
        let mut state = self.inner.state.lock();
        if state.faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        if state.faults.failing_grants > 0 {
            state.faults.failing_grants -= 1;
            return Err(ClientError::Store("lease grant rejected".to_string()));
        }
        if state.faults.empty_grants > 0 {
            state.faults.empty_grants -= 1;
            return Ok(None);
        }
        if ttl <= 0 {
            return Err(ClientError::Store(format!("invalid lease ttl {ttl}")));
        }

        let id = state.next_lease_id;
        state.next_lease_id += 1;
        state.grants += 1;
        state.leases.insert(
            id,
            LeaseRecord {
                ttl,
                deadline: Instant::now() + Duration::from_secs(ttl as u64),
                keys: HashSet::new(),
            },
        );
        debug!(lease_id = id, ttl, "lease granted");
        Ok(Some(Lease { id, ttl }))
    }

    async fn revoke(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        if !state.drop_lease(lease_id) {
            return Err(ClientError::Store(format!("lease {lease_id} not found")));
        }
        state.revokes += 1;
        debug!(lease_id, "lease revoked");
        Ok(())
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease_id: LeaseId) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        if state.faults.failing_puts > 0 {
            state.faults.failing_puts -= 1;
            return Err(ClientError::Store("put rejected".to_string()));
        }
        if !state.leases.contains_key(&lease_id) {
            return Err(ClientError::Store(format!("lease {lease_id} not found")));
        }

        state.revision += 1;
        let revision = state.revision;
        let (create_revision, previous_lease) = match state.kvs.get(key) {
            Some(entry) => (entry.create_revision, Some(entry.lease_id)),
            None => (revision, None),
        };
        if let Some(previous) = previous_lease
            && previous != lease_id
            && let Some(record) = state.leases.get_mut(&previous)
        {
            record.keys.remove(key);
        }
        if let Some(record) = state.leases.get_mut(&lease_id) {
            record.keys.insert(key.to_string());
        }

        state.kvs.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                create_revision,
                mod_revision: revision,
                lease_id,
            },
        );
        state.puts.push(PutRecord {
            key: key.to_string(),
            value: value.clone(),
            lease_id,
            revision,
        });
        state.notify(WatchEvent {
            kind: WatchKind::Put,
            key: key.to_string(),
            value,
            create_revision,
            mod_revision: revision,
        });
        Ok(())
    }

    async fn keep_alive(&self, lease_id: LeaseId) -> Result<KeepaliveStream> {
        let period = {
            let state = self.inner.state.lock();
            let record = state
                .leases
                .get(&lease_id)
                .ok_or_else(|| ClientError::Store(format!("lease {lease_id} not found")))?;
            Duration::from_millis((record.ttl as u64 * 1000 / 3).max(1))
        };

        let (tx, rx) = mpsc::channel(KEEPALIVE_BUFFER);
        tokio::spawn(keepalive_loop(
            Arc::downgrade(&self.inner),
            lease_id,
            period,
            tx,
        ));
        Ok(KeepaliveStream::new(lease_id, rx))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.inner.state.lock();
        if state.faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        // BTreeMap<String, _> iterates in raw byte order already
        Ok(state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue::new(k.as_bytes(), e.value.clone()))
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut state = self.inner.state.lock();
        if state.faults.unreachable {
            return Err(ClientError::Store("cluster unreachable".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(WatchStream::new(rx))
    }
}
