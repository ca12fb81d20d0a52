//! Registration state machine
//!
//! CONNECTING -> LEASING -> PUBLISHING -> KEEPALIVE, back to CONNECTING on
//! any unrecoverable error. Failures are reported through the result
//! callback; the loop itself never ends until shutdown is requested.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use beacon_api::NodeDescriptor;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, trace, warn};

use super::options::RegisterOptions;
use super::state::NodeStateHandle;
use crate::error::{ClientError, Result};
use crate::store::{DescriptorStore, KeepalivePoll, Lease, LeaseId};

/// Upper bound of one liveness probe
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
/// Wait between failed probes
pub(crate) const PROBE_RETRY: Duration = Duration::from_secs(1);
/// Wait after a failed grant or initial publish
pub(crate) const RETRY_DELAY: Duration = Duration::from_secs(3);
/// Keepalive tick when republishing only on demand
pub(crate) const IDLE_TICK: Duration = Duration::from_secs(1);
/// Keepalive tick while waiting for the refresh interval
pub(crate) const GATE_TICK: Duration = Duration::from_millis(200);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Leasing,
    Publishing,
    Keepalive,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Connecting => "CONNECTING",
            Phase::Leasing => "LEASING",
            Phase::Publishing => "PUBLISHING",
            Phase::Keepalive => "KEEPALIVE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub(crate) struct Engine {
    store: Arc<dyn DescriptorStore>,
    descriptor: NodeDescriptor,
    key: String,
    options: RegisterOptions,
    state: NodeStateHandle,
    phase: watch::Sender<Phase>,
    shutdown: watch::Receiver<bool>,
}

impl Engine {
    pub(crate) fn new(
        store: Arc<dyn DescriptorStore>,
        descriptor: NodeDescriptor,
        key: String,
        options: RegisterOptions,
        state: NodeStateHandle,
        phase: watch::Sender<Phase>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            descriptor,
            key,
            options,
            state,
            phase,
            shutdown,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(key = %self.key, ttl = self.options.ttl, "Registration started");

        while !self.is_shutdown() {
            if !self.connect().await {
                break;
            }

            let Some(lease) = self.lease().await else {
                self.pause(RETRY_DELAY).await;
                continue;
            };

            self.enter(Phase::Publishing);
            // the initial publish already carries the latest state
            self.state.take_forced_update();
            if let Err(err) = self.publish(lease.id).await {
                self.fail(&err);
                self.revoke(lease.id).await;
                self.pause(RETRY_DELAY).await;
                continue;
            }
            info!(key = %self.key, lease_id = lease.id, "Descriptor published");
            self.options.report(Ok(()));

            self.keepalive(lease).await;
            self.revoke(lease.id).await;
        }

        info!(key = %self.key, "Registration stopped");
    }

    fn enter(&self, phase: Phase) {
        debug!(key = %self.key, phase = %phase, "Registration phase");
        self.phase.send_replace(phase);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn fail(&self, err: &ClientError) {
        warn!(key = %self.key, "Registration error: {}", err);
        self.options.report(Err(err));
    }

    /// Wait for a reachable store. Returns false on shutdown.
    async fn connect(&mut self) -> bool {
        self.enter(Phase::Connecting);
        loop {
            if self.is_shutdown() {
                return false;
            }
            match bounded(PROBE_TIMEOUT, "liveness probe", self.store.probe()).await {
                Ok(()) => return true,
                Err(err) => self.fail(&err),
            }
            self.pause(PROBE_RETRY).await;
        }
    }

    async fn lease(&mut self) -> Option<Lease> {
        self.enter(Phase::Leasing);
        let result = bounded(
            self.options.connect_timeout,
            "lease grant",
            self.store.grant(self.options.ttl),
        )
        .await;
        match result {
            Ok(Some(lease)) => {
                debug!(lease_id = lease.id, ttl = lease.ttl, "Lease granted");
                Some(lease)
            }
            Ok(None) => {
                self.fail(&ClientError::LeaseNotGranted);
                None
            }
            Err(err) => {
                self.fail(&err);
                None
            }
        }
    }

    /// Fill the descriptor and write it under the lease.
    async fn publish(&mut self, lease_id: LeaseId) -> Result<()> {
        if let Some(hook) = &self.options.hook {
            hook(&mut self.descriptor);
        }
        let state = self.state.current_state();
        self.descriptor
            .stamp(&state, chrono::Utc::now().timestamp_millis());
        let value = self.descriptor.to_json()?;

        bounded(
            self.options.connect_timeout,
            "descriptor put",
            self.store.put(&self.key, value, lease_id),
        )
        .await?;
        trace!(key = %self.key, lease_id, state = %state, "Descriptor written");
        Ok(())
    }

    async fn keepalive(&mut self, lease: Lease) {
        self.enter(Phase::Keepalive);
        let mut stream = match bounded(
            self.options.connect_timeout,
            "keepalive open",
            self.store.keep_alive(lease.id),
        )
        .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(&err);
                return;
            }
        };

        let mut last_publish = Instant::now();
        loop {
            if self.is_shutdown() {
                return;
            }

            match stream.poll() {
                KeepalivePoll::Ack(resp) => {
                    trace!(lease_id = resp.id, ttl = resp.ttl, "Keepalive acknowledged");
                    self.options.report(Ok(()));
                    continue;
                }
                KeepalivePoll::Expired => {
                    self.fail(&ClientError::LeaseExpired(lease.id));
                    return;
                }
                KeepalivePoll::Closed => {
                    self.fail(&ClientError::KeepaliveClosed(lease.id));
                    return;
                }
                KeepalivePoll::Pending => {}
            }

            // forced updates skip both timing gates
            if !self.state.take_forced_update() {
                if !self.options.always_update {
                    self.idle(IDLE_TICK).await;
                    continue;
                }
                if last_publish.elapsed() < self.options.interval {
                    self.idle(GATE_TICK).await;
                    continue;
                }
            }

            if let Err(err) = self.publish(lease.id).await {
                self.fail(&err);
                return;
            }
            debug!(key = %self.key, lease_id = lease.id, "Descriptor republished");
            self.options.report(Ok(()));
            last_publish = Instant::now();
        }
    }

    /// Best-effort revoke; the lease self-expires if this fails.
    async fn revoke(&self, lease_id: LeaseId) {
        let result = bounded(
            self.options.connect_timeout,
            "lease revoke",
            self.store.revoke(lease_id),
        )
        .await;
        match result {
            Ok(()) => debug!(lease_id, "Lease revoked"),
            Err(err) => warn!(lease_id, "Lease revoke failed: {}", err),
        }
    }

    /// Sleep, returning early on shutdown.
    async fn pause(&self, duration: Duration) {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = sleep(duration) => {}
            _ = wait_shutdown(shutdown) => {}
        }
    }

    /// Sleep, returning early on shutdown or a forced update.
    async fn idle(&self, duration: Duration) {
        if self.state.is_update_forced() {
            return;
        }
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = sleep(duration) => {}
            _ = wait_shutdown(shutdown) => {}
            _ = self.state.forced() => {}
        }
    }
}

async fn bounded<T, F>(limit: Duration, what: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    timeout(limit, fut)
        .await
        .unwrap_or(Err(ClientError::Timeout(what)))
}

async fn wait_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // handle dropped without a shutdown request
            std::future::pending::<()>().await;
        }
    }
}
