//! Local mirror of subscribed services' node descriptors
//!
//! One reader/writer lock guards the whole map. Writers hold it only for the
//! map or list mutation; descriptors are decoded before the lock is taken.
//! Readers collect shared handles under the lock and deep-copy after
//! releasing it.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_api::{NodeDescriptor, SubscribedService};
use parking_lot::RwLock;

/// One watched peer key.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeEntry {
    pub key: String,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub descriptor: Arc<NodeDescriptor>,
}

impl NodeEntry {
    pub fn new(
        key: impl Into<String>,
        create_revision: i64,
        mod_revision: i64,
        descriptor: NodeDescriptor,
    ) -> Self {
        Self {
            key: key.into(),
            create_revision,
            mod_revision,
            descriptor: Arc::new(descriptor),
        }
    }

    /// Case-insensitive state check.
    pub fn is_state(&self, state: &str) -> bool {
        self.descriptor.is_state(state)
    }
}

/// What an update did to the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheChange {
    Added,
    Updated,
    Removed,
    /// Unknown service, unknown key, or an event older than the cached entry
    Ignored,
}

#[derive(Debug)]
struct ServiceNodes {
    info: SubscribedService,
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Default)]
pub struct SubscriptionCache {
    services: RwLock<HashMap<String, ServiceNodes>>,
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a cache with an empty node list per subscribed service.
    pub fn with_services(services: &[SubscribedService]) -> Self {
        let cache = Self::new();
        cache.init(services);
        cache
    }

    /// Reset to an empty node list per subscribed service.
    pub fn init(&self, services: &[SubscribedService]) {
        let map = services
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    ServiceNodes {
                        info: s.clone(),
                        nodes: Vec::with_capacity(1),
                    },
                )
            })
            .collect();
        *self.services.write() = map;
    }

    /// Insert or replace the entry for `entry.key`.
    ///
    /// An entry already cached with a newer revision wins.
    pub fn upsert(&self, service: &str, entry: NodeEntry) -> CacheChange {
        let mut services = self.services.write();
        let Some(list) = services.get_mut(service) else {
            return CacheChange::Ignored;
        };
        match list.nodes.iter_mut().find(|n| n.key == entry.key) {
            Some(existing) if existing.mod_revision > entry.mod_revision => CacheChange::Ignored,
            Some(existing) => {
                *existing = entry;
                CacheChange::Updated
            }
            None => {
                list.nodes.push(entry);
                CacheChange::Added
            }
        }
    }

    /// Drop the entry for `key` unless it was written after `mod_revision`.
    pub fn remove(&self, service: &str, key: &str, mod_revision: i64) -> CacheChange {
        let mut services = self.services.write();
        let Some(list) = services.get_mut(service) else {
            return CacheChange::Ignored;
        };
        match list.nodes.iter().position(|n| n.key == key) {
            Some(idx) if list.nodes[idx].mod_revision > mod_revision => CacheChange::Ignored,
            Some(idx) => {
                list.nodes.remove(idx);
                CacheChange::Removed
            }
            None => CacheChange::Ignored,
        }
    }

    /// Swap in a freshly listed node set for `service`.
    pub fn replace(&self, service: &str, nodes: Vec<NodeEntry>) -> bool {
        let mut services = self.services.write();
        match services.get_mut(service) {
            Some(list) => {
                list.nodes = nodes;
                true
            }
            None => false,
        }
    }

    /// Names of every subscribed service.
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn subscribed(&self, service: &str) -> Option<SubscribedService> {
        self.services.read().get(service).map(|l| l.info.clone())
    }

    /// Every cached entry of `service`, regardless of state.
    pub fn entries(&self, service: &str) -> Vec<NodeEntry> {
        self.services
            .read()
            .get(service)
            .map(|l| l.nodes.clone())
            .unwrap_or_default()
    }

    /// Collect shared handles of matching entries under the read lock.
    ///
    /// The service name matches case-insensitively.
    pub(crate) fn select<F>(&self, name: &str, filter: F) -> Vec<Arc<NodeDescriptor>>
    where
        F: Fn(&NodeEntry) -> bool,
    {
        let services = self.services.read();
        services
            .iter()
            .find(|(service, _)| service.eq_ignore_ascii_case(name))
            .map(|(_, list)| {
                list.nodes
                    .iter()
                    .filter(|n| filter(n))
                    .map(|n| n.descriptor.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Same as [`select`](Self::select) but the service name must match exactly.
    pub(crate) fn select_exact<F>(&self, name: &str, filter: F) -> Vec<Arc<NodeDescriptor>>
    where
        F: Fn(&NodeEntry) -> bool,
    {
        self.services
            .read()
            .get(name)
            .map(|list| {
                list.nodes
                    .iter()
                    .filter(|n| filter(n))
                    .map(|n| n.descriptor.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn count<F>(&self, name: &str, filter: F) -> usize
    where
        F: Fn(&NodeEntry) -> bool,
    {
        let services = self.services.read();
        services
            .iter()
            .find(|(service, _)| service.eq_ignore_ascii_case(name))
            .map(|(_, list)| list.nodes.iter().filter(|n| filter(n)).count())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, node_id: &str, state: &str, rev: i64) -> NodeEntry {
        let mut desc = NodeDescriptor::new("orders", node_id, "1.0", "10.0.0.1");
        desc.global.state = state.to_string();
        NodeEntry::new(key, rev, rev, desc)
    }

    fn cache() -> SubscriptionCache {
        SubscriptionCache::with_services(&[SubscribedService::new("orders", "1.0", "voice")])
    }

    #[test]
    fn test_upsert_add_then_update() {
        let cache = cache();
        assert_eq!(
            cache.upsert("orders", entry("k1", "n1", "ONLINE", 2)),
            CacheChange::Added
        );
        assert_eq!(
            cache.upsert("orders", entry("k1", "n1", "BYPASS", 3)),
            CacheChange::Updated
        );
        let entries = cache.entries("orders");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].descriptor.state(), "BYPASS");
    }

    #[test]
    fn test_stale_put_is_ignored() {
        let cache = cache();
        cache.upsert("orders", entry("k1", "n1", "ONLINE", 5));
        assert_eq!(
            cache.upsert("orders", entry("k1", "n1", "NOT_READY", 4)),
            CacheChange::Ignored
        );
        assert_eq!(cache.entries("orders")[0].descriptor.state(), "ONLINE");
    }

    #[test]
    fn test_unsubscribed_service_is_ignored() {
        let cache = cache();
        assert_eq!(
            cache.upsert("billing", entry("k1", "n1", "ONLINE", 1)),
            CacheChange::Ignored
        );
        assert!(cache.entries("billing").is_empty());
    }

    #[test]
    fn test_remove() {
        let cache = cache();
        cache.upsert("orders", entry("k1", "n1", "ONLINE", 2));
        cache.upsert("orders", entry("k2", "n2", "ONLINE", 3));

        assert_eq!(cache.remove("orders", "k1", 1), CacheChange::Ignored);
        assert_eq!(cache.remove("orders", "k1", 4), CacheChange::Removed);
        assert_eq!(cache.remove("orders", "k1", 5), CacheChange::Ignored);
        assert_eq!(cache.entries("orders").len(), 1);
    }

    #[test]
    fn test_replace_and_names() {
        let cache = SubscriptionCache::with_services(&[
            SubscribedService::new("orders", "1.0", "voice"),
            SubscribedService::new("billing", "", "voice"),
        ]);
        assert_eq!(cache.service_names(), vec!["billing", "orders"]);

        cache.upsert("orders", entry("k1", "n1", "ONLINE", 2));
        assert!(cache.replace("orders", vec![entry("k9", "n9", "ONLINE", 9)]));
        assert_eq!(cache.entries("orders")[0].key, "k9");
        assert!(!cache.replace("gateway", Vec::new()));

        assert_eq!(cache.subscribed("billing").unwrap().namespace, "voice");
    }

    #[test]
    fn test_select_matches_name_case_insensitively() {
        let cache = cache();
        cache.upsert("orders", entry("k1", "n1", "ONLINE", 2));
        assert_eq!(cache.select("ORDERS", |_| true).len(), 1);
        assert!(cache.select_exact("ORDERS", |_| true).is_empty());
        assert_eq!(cache.count("Orders", |n| n.is_state("online")), 1);
    }
}
