//! Lease-based registration of the local node
//!
//! [`start_registration`] validates the descriptor and spawns the engine loop.
//! The loop owns its lease exclusively and keeps the descriptor alive under
//! it until the returned handle is shut down.

mod engine;
pub mod options;
pub mod state;

use std::sync::Arc;

use beacon_api::NodeDescriptor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::Result;
use crate::store::DescriptorStore;

pub use engine::Phase;
pub use options::{PrePublishHook, RegisterOptions, ResultCallback};
pub use state::NodeStateHandle;

use engine::Engine;

/// Handle to a running registration loop.
pub struct RegistrationHandle {
    key: String,
    phase: watch::Receiver<Phase>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RegistrationHandle {
    /// Store key the descriptor is published under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Stop the loop, revoke the live lease and wait for the task to exit.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        if let Err(e) = self.task.await {
            warn!("Registration task ended abnormally: {}", e);
        }
    }
}

/// Validate `descriptor` and spawn the registration loop.
///
/// Fails synchronously when a required descriptor field is empty. Runtime
/// failures only reach `options.callback`.
pub fn start_registration(
    store: Arc<dyn DescriptorStore>,
    descriptor: NodeDescriptor,
    options: RegisterOptions,
    state: NodeStateHandle,
) -> Result<RegistrationHandle> {
    descriptor.validate()?;
    let key = descriptor.register_key(&options.namespace);

    let (phase_tx, phase_rx) = watch::channel(Phase::Connecting);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::new(
        store,
        descriptor,
        key.clone(),
        options,
        state,
        phase_tx,
        shutdown_rx,
    );
    let task = tokio::spawn(engine.run());

    Ok(RegistrationHandle {
        key,
        phase: phase_rx,
        shutdown: shutdown_tx,
        task,
    })
}
