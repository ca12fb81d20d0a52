//! Point-in-time queries for client-side load balancing
//!
//! Every result is a deep copy taken after the cache lock is released.

use beacon_api::{NodeDescriptor, NodeState};
use beacon_common::STATE_ONLINE;
use rand::Rng;
use rand::seq::SliceRandom;

use super::cache::{NodeEntry, SubscriptionCache};

impl SubscriptionCache {
    /// Online nodes of `name`, private payload included.
    pub fn online_by_name(&self, name: &str) -> Vec<NodeDescriptor> {
        self.filtered(name, |n| n.is_state(STATE_ONLINE))
    }

    /// Nodes of `name` accepted by `filter`, private payload included.
    pub fn filtered<F>(&self, name: &str, filter: F) -> Vec<NodeDescriptor>
    where
        F: Fn(&NodeEntry) -> bool,
    {
        self.select(name, filter)
            .iter()
            .map(|d| d.snapshot(true))
            .collect()
    }

    /// Number of nodes of `name` accepted by `filter`, without copying.
    pub fn count_filtered<F>(&self, name: &str, filter: F) -> usize
    where
        F: Fn(&NodeEntry) -> bool,
    {
        self.count(name, filter)
    }

    /// Online nodes of `name` in uniformly random order.
    pub fn random_order(&self, name: &str) -> Vec<NodeDescriptor> {
        let mut nodes = self.online_by_name(name);
        nodes.shuffle(&mut rand::rng());
        nodes
    }

    /// One online node of `name` picked uniformly, without its private payload.
    pub fn one_random(&self, name: &str) -> Option<NodeDescriptor> {
        let nodes = self.select(name, |n| n.is_state(STATE_ONLINE));
        if nodes.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..nodes.len());
        Some(nodes[idx].snapshot(false))
    }

    /// The node `node_id` of `name`, if it is online or bypassed.
    ///
    /// The service name must match exactly. A node in any other state is
    /// reported as absent. The private payload is not copied.
    pub fn by_name_and_node_id(&self, name: &str, node_id: &str) -> Option<NodeDescriptor> {
        let nodes = self.select_exact(name, |n| n.descriptor.node_id() == node_id);
        let node = nodes.first()?;
        if NodeState::from(node.state()).is_addressable() {
            Some(node.snapshot(false))
        } else {
            None
        }
    }
}
