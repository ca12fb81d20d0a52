//! Registry facade
//!
//! Ties configuration, store, node state, registration and subscription
//! together behind one object per process.

use std::sync::Arc;

use beacon_api::{KeyValue, NodeDescriptor, NodeState};
use beacon_common::{KEY_PREFIX, KEY_SEPARATOR};
use parking_lot::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::info;

use crate::config::{PredefinedEndpoints, RegisterSection, RegistryConfig};
use crate::error::{ClientError, Result};
use crate::registration::{
    NodeStateHandle, Phase, RegisterOptions, RegistrationHandle, start_registration,
};
use crate::store::DescriptorStore;
use crate::subscription::{NodeEntry, SubscriptionCache, SubscriptionHandle, start_subscription};

pub struct ServiceRegistry {
    config: RwLock<RegistryConfig>,
    store: Arc<dyn DescriptorStore>,
    state: NodeStateHandle,
    cache: Arc<SubscriptionCache>,
    registration: Mutex<Option<RegistrationHandle>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ServiceRegistry {
    /// The initial node state comes from `register.global.state`, or
    /// `NOT_READY` when unset.
    pub fn new(config: RegistryConfig, store: Arc<dyn DescriptorStore>) -> Self {
        let initial = config
            .register
            .as_ref()
            .map(|r| r.global.state.as_str())
            .filter(|s| !s.is_empty())
            .map(NodeState::from)
            .unwrap_or_default();

        Self {
            config: RwLock::new(config),
            store,
            state: NodeStateHandle::new(initial),
            cache: Arc::new(SubscriptionCache::new()),
            registration: Mutex::new(None),
            subscription: Mutex::new(None),
        }
    }

    pub fn set_private_ip(&self, ip: impl Into<String>) {
        self.config.write().set_private_ip(ip);
    }

    pub fn set_public_ip(&self, ip: impl Into<String>) {
        self.config.write().set_public_ip(ip);
    }

    pub fn set_node_id(&self, node_id: impl Into<String>) {
        self.config.write().set_node_id(node_id);
    }

    pub fn apply_predefined_endpoints(&self, predefined: &PredefinedEndpoints) {
        self.config.write().apply_predefined_endpoints(predefined);
    }

    pub fn override_register_version(&self, version: &str) {
        self.config.write().override_register_version(version);
    }

    pub fn override_subscribe_version(&self, name: &str, version: &str) -> bool {
        self.config.write().override_subscribe_version(name, version)
    }

    /// Options derived from configuration; add a hook or callback before
    /// passing them to [`start_registration`](Self::start_registration).
    pub fn register_options(&self) -> RegisterOptions {
        self.config.read().register_options()
    }

    /// Build the local descriptor and start the registration loop.
    pub fn start_registration(&self, options: RegisterOptions) -> Result<()> {
        let mut registration = self.registration.lock();
        if registration.is_some() {
            return Err(ClientError::AlreadyStarted);
        }
        let descriptor = self.config.read().local_descriptor()?;
        let handle = start_registration(
            self.store.clone(),
            descriptor,
            options,
            self.state.clone(),
        )?;
        info!(key = %handle.key(), "Local node registration started");
        *registration = Some(handle);
        Ok(())
    }

    /// Seed the cache with every configured service and start watching.
    pub async fn start_subscription(&self) -> Result<()> {
        let services = self.config.read().subscribed_services()?;
        let handle =
            start_subscription(self.store.clone(), self.cache.clone(), services).await?;
        // a previous subscription's watchers are aborted on drop
        *self.subscription.lock() = Some(handle);
        Ok(())
    }

    pub fn change_state(&self, state: impl Into<NodeState>) {
        self.state.change_state(state);
    }

    pub fn request_immediate_update(&self) {
        self.state.request_immediate_update();
    }

    pub fn current_state(&self) -> NodeState {
        self.state.current_state()
    }

    pub fn state_handle(&self) -> NodeStateHandle {
        self.state.clone()
    }

    pub fn registration_phase(&self) -> Option<Phase> {
        self.registration.lock().as_ref().map(|h| h.phase())
    }

    pub fn registration_key(&self) -> Option<String> {
        self.registration
            .lock()
            .as_ref()
            .map(|h| h.key().to_string())
    }

    /// Raw pairs under `prefix` (every registry key when empty), sorted by key.
    pub async fn prefix_kvs(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let prefix = if prefix.is_empty() {
            format!("{}{}", KEY_PREFIX, KEY_SEPARATOR)
        } else {
            prefix.to_string()
        };
        let limit = self.config.read().connect_timeout();
        let mut kvs = timeout(limit, self.store.get_prefix(&prefix))
            .await
            .map_err(|_| ClientError::Timeout("prefix read"))??;
        beacon_api::kv::sort_by_key(&mut kvs);
        Ok(kvs)
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        self.config.read().subscribed_names()
    }

    pub fn register_config(&self) -> Option<RegisterSection> {
        self.config.read().register.clone()
    }

    pub fn config(&self) -> RegistryConfig {
        self.config.read().clone()
    }

    pub fn cache(&self) -> Arc<SubscriptionCache> {
        self.cache.clone()
    }

    pub fn online_by_name(&self, name: &str) -> Vec<NodeDescriptor> {
        self.cache.online_by_name(name)
    }

    pub fn filtered<F>(&self, name: &str, filter: F) -> Vec<NodeDescriptor>
    where
        F: Fn(&NodeEntry) -> bool,
    {
        self.cache.filtered(name, filter)
    }

    pub fn count_filtered<F>(&self, name: &str, filter: F) -> usize
    where
        F: Fn(&NodeEntry) -> bool,
    {
        self.cache.count_filtered(name, filter)
    }

    pub fn random_order(&self, name: &str) -> Vec<NodeDescriptor> {
        self.cache.random_order(name)
    }

    pub fn one_random(&self, name: &str) -> Option<NodeDescriptor> {
        self.cache.one_random(name)
    }

    pub fn by_name_and_node_id(&self, name: &str, node_id: &str) -> Option<NodeDescriptor> {
        self.cache.by_name_and_node_id(name, node_id)
    }

    /// Stop watchers and the registration loop, revoking the live lease.
    pub async fn shutdown(&self) {
        let subscription = self.subscription.lock().take();
        if let Some(handle) = subscription {
            handle.shutdown().await;
        }
        let registration = self.registration.lock().take();
        if let Some(handle) = registration {
            handle.shutdown().await;
        }
        info!("Service registry stopped");
    }
}
