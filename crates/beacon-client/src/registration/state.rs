//! Node state context shared between the engine and its callers
//!
//! The current state sits behind a reader/writer lock. The forced-update
//! flag is a separate atomic so the keepalive poll never takes the lock just
//! to check it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use beacon_api::NodeState;
use parking_lot::RwLock;
use tokio::sync::Notify;

#[derive(Clone, Debug, Default)]
pub struct NodeStateHandle {
    state: Arc<RwLock<NodeState>>,
    forced_update: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl NodeStateHandle {
    pub fn new(initial: NodeState) -> Self {
        Self {
            state: Arc::new(RwLock::new(initial)),
            ..Default::default()
        }
    }

    /// Set the state and force a republish on the next keepalive tick.
    pub fn change_state(&self, state: impl Into<NodeState>) {
        let mut guard = self.state.write();
        *guard = state.into();
        self.forced_update.store(true, Ordering::SeqCst);
        drop(guard);
        self.wake.notify_one();
    }

    /// Force a republish without changing the state.
    pub fn request_immediate_update(&self) {
        self.forced_update.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn current_state(&self) -> NodeState {
        self.state.read().clone()
    }

    /// Clear the forced-update flag, returning whether it was set.
    pub(crate) fn take_forced_update(&self) -> bool {
        self.forced_update.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_update_forced(&self) -> bool {
        self.forced_update.load(Ordering::SeqCst)
    }

    /// Resolves once a forced update is requested after the call.
    pub(crate) async fn forced(&self) {
        self.wake.notified().await
    }
}
