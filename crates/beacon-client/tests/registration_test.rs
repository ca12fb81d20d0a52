//! Beacon Client Registration Tests
//!
//! Drives the registration engine against the in-memory store with a paused
//! clock, so retry sleeps and lease deadlines advance instantly.

use std::sync::Arc;
use std::time::Duration;

use beacon_api::{NodeDescriptor, NodeState, ServiceEndpoint};
use beacon_client::registration::Phase;
use beacon_client::store::DescriptorStore;
use beacon_client::{ClientError, MemoryStore, NodeStateHandle, RegisterOptions, start_registration};
use parking_lot::Mutex;
use tokio::time::sleep;

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Result<(), String>>>>,
}

impl Recorder {
    fn options(&self) -> RegisterOptions {
        let events = self.events.clone();
        RegisterOptions::new()
            .with_ttl(6)
            .with_callback(move |res| events.lock().push(res.map_err(|e| e.to_string())))
    }

    fn events(&self) -> Vec<Result<(), String>> {
        self.events.lock().clone()
    }

    fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.err())
            .collect()
    }
}

fn descriptor() -> NodeDescriptor {
    let mut desc = NodeDescriptor::new("orders", "n1", "1.0.0", "10.0.0.1");
    desc.endpoints.push(ServiceEndpoint::new("http", 8080));
    desc
}

fn decode_last_put(store: &MemoryStore) -> NodeDescriptor {
    let puts = store.puts();
    let last = puts.last().expect("no descriptor written");
    NodeDescriptor::from_json(&last.value).expect("descriptor decodes")
}

fn shared(store: &MemoryStore) -> Arc<dyn DescriptorStore> {
    Arc::new(store.clone())
}

// ============== Startup Tests ==============

#[tokio::test]
async fn test_start_rejects_incomplete_descriptor() {
    let store = MemoryStore::new();
    let desc = NodeDescriptor::new("orders", "n1", "1.0.0", "");
    let result = start_registration(
        shared(&store),
        desc,
        RegisterOptions::new(),
        NodeStateHandle::default(),
    );
    assert!(matches!(result, Err(ClientError::Common(_))));
    assert_eq!(store.grant_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_initial_publish() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_millis(500)).await;

    let expected_key = descriptor().register_key("voice");
    assert_eq!(handle.key(), expected_key);
    assert!(store.get(&expected_key).is_some());
    assert_eq!(handle.phase(), Phase::Keepalive);

    let published = decode_last_put(&store);
    assert_eq!(published.state(), "NOT_READY");
    assert!(published.global.timestamp_millis().is_some());
    assert_eq!(published.port("http", 0), 8080);
    assert!(recorder.errors().is_empty());

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_hook_runs_before_publish() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let options = RegisterOptions::new().with_hook(|desc: &mut NodeDescriptor| {
        desc.profile.cpu = 42;
    });
    let handle = start_registration(
        shared(&store),
        descriptor(),
        options,
        NodeStateHandle::new(NodeState::Online),
    )?;

    sleep(Duration::from_millis(500)).await;
    let published = decode_last_put(&store);
    assert_eq!(published.profile.cpu, 42);
    assert_eq!(published.state(), "ONLINE");

    handle.shutdown().await;
    Ok(())
}

// ============== Failure Recovery Tests ==============

#[tokio::test(start_paused = true)]
async fn test_grant_failures_then_publish() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.fail_next_grants(3);
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    // three failed grants, three retry delays
    sleep(Duration::from_secs(8)).await;
    assert_eq!(store.put_count(), 0);
    assert_eq!(recorder.errors().len(), 3);

    sleep(Duration::from_secs(4)).await;
    assert_eq!(store.grant_count(), 1);
    assert_eq!(store.puts()[0].lease_id, 1);

    let events = recorder.events();
    assert!(events[..3].iter().all(|e| e.is_err()));
    assert!(events[3..].iter().all(|e| e.is_ok()));
    assert!(events.len() > 3);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_empty_grant_is_reported() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.empty_next_grants(1);
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(4)).await;
    assert_eq!(recorder.errors(), vec!["lease not granted".to_string()]);
    assert_eq!(store.put_count(), 1);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_initial_put_revokes_and_retries() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.fail_next_puts(1);
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(4)).await;
    assert_eq!(store.grant_count(), 2);
    assert_eq!(store.revoke_count(), 1);
    assert_eq!(store.live_leases(), vec![2]);
    assert_eq!(recorder.errors().len(), 1);
    assert!(store.get(handle.key()).is_some());

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_blocks_grant() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.phase(), Phase::Connecting);
    assert_eq!(store.grant_count(), 0);
    assert!(!recorder.errors().is_empty());

    store.set_reachable(true);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(store.grant_count(), 1);
    assert_eq!(store.put_count(), 1);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lease_expiry_restarts_registration() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(5)).await;
    assert!(store.expire_lease(1));
    assert!(store.get(handle.key()).is_none());

    sleep(Duration::from_secs(5)).await;
    assert!(recorder.errors().contains(&"lease 1 expired".to_string()));
    assert_eq!(store.grant_count(), 2);
    assert_eq!(store.live_leases(), vec![2]);
    assert_eq!(store.puts().last().map(|p| p.lease_id), Some(2));
    assert!(store.get(handle.key()).is_some());

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_partition_lets_key_lapse_then_recovers() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(5)).await;
    store.suspend_keepalive(true);
    store.set_reachable(false);

    sleep(Duration::from_secs(15)).await;
    assert!(store.get(handle.key()).is_none());
    assert_eq!(handle.phase(), Phase::Connecting);
    assert!(recorder.errors().contains(&"lease 1 expired".to_string()));

    store.suspend_keepalive(false);
    store.set_reachable(true);
    sleep(Duration::from_secs(3)).await;
    assert!(store.get(handle.key()).is_some());
    assert_eq!(handle.phase(), Phase::Keepalive);

    handle.shutdown().await;
    Ok(())
}

// ============== Republish Tests ==============

#[tokio::test(start_paused = true)]
async fn test_change_state_republishes_once() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = NodeStateHandle::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        RegisterOptions::new(),
        state.clone(),
    )?;

    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.put_count(), 1);

    state.change_state(NodeState::Online);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(store.put_count(), 2);
    assert_eq!(decode_last_put(&store).state(), "ONLINE");

    // no periodic refresh without a forced update
    sleep(Duration::from_secs(60)).await;
    assert_eq!(store.put_count(), 2);

    state.request_immediate_update();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(store.put_count(), 3);
    assert_eq!(decode_last_put(&store).state(), "ONLINE");

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_state_change_before_publish_is_not_repeated() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    store.set_reachable(false);
    let state = NodeStateHandle::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        RegisterOptions::new(),
        state.clone(),
    )?;

    sleep(Duration::from_secs(2)).await;
    assert_eq!(handle.phase(), Phase::Connecting);
    state.change_state("bypass");

    store.set_reachable(true);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.put_count(), 1);
    let published = decode_last_put(&store);
    assert_eq!(published.state(), "BYPASS");
    assert_eq!(handle.phase(), Phase::Keepalive);

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_always_update_refreshes_on_interval() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let options = RegisterOptions::new()
        .with_always_update(true)
        .with_interval(Duration::from_secs(2));
    let handle = start_registration(
        shared(&store),
        descriptor(),
        options,
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.put_count(), 1);

    sleep(Duration::from_secs(10)).await;
    let count = store.put_count();
    assert!((5..=7).contains(&count), "unexpected publish count {count}");

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_forced_update_bypasses_interval() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = NodeStateHandle::default();
    let options = RegisterOptions::new()
        .with_always_update(true)
        .with_interval(Duration::from_secs(60));
    let handle = start_registration(shared(&store), descriptor(), options, state.clone())?;

    sleep(Duration::from_secs(1)).await;
    assert_eq!(store.put_count(), 1);

    state.change_state("BYPASS");
    sleep(Duration::from_millis(500)).await;
    assert_eq!(store.put_count(), 2);
    assert_eq!(decode_last_put(&store).state(), "BYPASS");

    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_republish_restarts() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let state = NodeStateHandle::default();
    let recorder = Recorder::default();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        recorder.options(),
        state.clone(),
    )?;

    sleep(Duration::from_secs(1)).await;
    store.fail_next_puts(1);
    state.change_state(NodeState::Online);

    sleep(Duration::from_secs(3)).await;
    assert_eq!(recorder.errors(), vec!["store error: put rejected".to_string()]);
    assert_eq!(store.revoke_count(), 1);
    assert_eq!(store.live_leases(), vec![2]);
    assert_eq!(decode_last_put(&store).state(), "ONLINE");

    handle.shutdown().await;
    Ok(())
}

// ============== Shutdown Tests ==============

#[tokio::test(start_paused = true)]
async fn test_shutdown_revokes_lease() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let handle = start_registration(
        shared(&store),
        descriptor(),
        RegisterOptions::new(),
        NodeStateHandle::default(),
    )?;

    sleep(Duration::from_secs(3)).await;
    let key = handle.key().to_string();
    assert!(store.get(&key).is_some());

    handle.shutdown().await;
    assert!(store.get(&key).is_none());
    assert!(store.live_leases().is_empty());
    assert_eq!(store.revoke_count(), 1);
    Ok(())
}
