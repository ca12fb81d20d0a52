//! Keeps the subscription cache in step with the store
//!
//! Per service: list the prefix to seed the cache, then apply watch events.
//! When the watch stream ends the service is re-listed and re-watched.

use std::sync::Arc;
use std::time::Duration;

use beacon_api::{KeyValue, NodeDescriptor, SubscribedService, parse_register_key};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::cache::{CacheChange, NodeEntry, SubscriptionCache};
use crate::error::Result;
use crate::store::{DescriptorStore, WatchEvent, WatchKind, WatchStream};

/// Wait before re-listing after a watch ends or a resync fails
pub(crate) const RESYNC_DELAY: Duration = Duration::from_secs(1);

/// Running watchers; aborted on drop.
pub struct SubscriptionHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn watcher_count(&self) -> usize {
        self.tasks.len()
    }

    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Seed `cache` for every service in `services` and start watching them.
///
/// The cache is reset to the given services first. Returns once every
/// service has been listed, so queries are meaningful immediately.
pub async fn start_subscription(
    store: Arc<dyn DescriptorStore>,
    cache: Arc<SubscriptionCache>,
    services: Vec<SubscribedService>,
) -> Result<SubscriptionHandle> {
    cache.init(&services);

    let mut handle = SubscriptionHandle {
        tasks: Vec::with_capacity(services.len()),
    };
    for service in services {
        // watch before listing so nothing between the two is missed
        let stream = store.watch_prefix(&service.prefix()).await?;
        resync(store.as_ref(), &cache, &service).await?;
        info!(
            service = %service.name,
            prefix = %service.prefix(),
            nodes = cache.entries(&service.name).len(),
            "Subscribed"
        );
        handle.tasks.push(tokio::spawn(watch_loop(
            store.clone(),
            cache.clone(),
            service,
            stream,
        )));
    }
    Ok(handle)
}

async fn resync(
    store: &dyn DescriptorStore,
    cache: &SubscriptionCache,
    service: &SubscribedService,
) -> Result<()> {
    let kvs = store.get_prefix(&service.prefix()).await?;
    cache.replace(&service.name, decode_listing(&service.name, &kvs));
    Ok(())
}

/// Whether `key` is a node key of exactly `service`.
///
/// A service prefix also covers dotted siblings: `registry.voice.billing.`
/// matches the keys of a service named `billing.v2`.
fn is_service_key(service: &str, key: &str) -> bool {
    matches!(parse_register_key(key), Some((_, name, _)) if name == service)
}

fn decode_listing(service: &str, kvs: &[KeyValue]) -> Vec<NodeEntry> {
    kvs.iter()
        .filter(|kv| is_service_key(service, &kv.key_str()))
        .filter_map(|kv| match NodeDescriptor::from_json(&kv.value) {
            Ok(desc) => Some(NodeEntry::new(kv.key_str(), 0, 0, desc)),
            Err(e) => {
                warn!(key = %kv.key_str(), "Skipping undecodable descriptor: {}", e);
                None
            }
        })
        .collect()
}

pub(crate) fn apply_event(
    cache: &SubscriptionCache,
    service: &str,
    event: WatchEvent,
) -> CacheChange {
    if !is_service_key(service, &event.key) {
        trace!(service, key = %event.key, "Ignoring key of another service");
        return CacheChange::Ignored;
    }
    let change = match event.kind {
        WatchKind::Put => match NodeDescriptor::from_json(&event.value) {
            Ok(desc) => cache.upsert(
                service,
                NodeEntry::new(
                    event.key.clone(),
                    event.create_revision,
                    event.mod_revision,
                    desc,
                ),
            ),
            Err(e) => {
                warn!(key = %event.key, "Skipping undecodable descriptor: {}", e);
                CacheChange::Ignored
            }
        },
        WatchKind::Delete => cache.remove(service, &event.key, event.mod_revision),
    };
    debug!(
        service,
        key = %event.key,
        revision = event.mod_revision,
        ?change,
        "Watch event applied"
    );
    change
}

async fn watch_loop(
    store: Arc<dyn DescriptorStore>,
    cache: Arc<SubscriptionCache>,
    service: SubscribedService,
    mut stream: WatchStream,
) {
    let prefix = service.prefix();
    loop {
        while let Some(event) = stream.next().await {
            apply_event(&cache, &service.name, event);
        }
        warn!(service = %service.name, "Watch stream closed, resyncing");

        stream = loop {
            tokio::time::sleep(RESYNC_DELAY).await;
            let opened = match store.watch_prefix(&prefix).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(service = %service.name, "Watch failed: {}", e);
                    continue;
                }
            };
            match resync(store.as_ref(), &cache, &service).await {
                Ok(()) => break opened,
                Err(e) => warn!(service = %service.name, "Resync failed: {}", e),
            }
        };
        info!(service = %service.name, "Watch re-established");
    }
}
