//! Registration options
//!
//! Values out of range are coerced to their defaults instead of rejected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use beacon_api::NodeDescriptor;
use beacon_common::DEFAULT_NAMESPACE;

use crate::error::ClientError;

pub const DEFAULT_TTL_SECS: i64 = 6;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Runs before every publish, after identity fields are in place and before
/// state and timestamp are stamped.
pub type PrePublishHook = Arc<dyn Fn(&mut NodeDescriptor) + Send + Sync>;

/// Receives `Ok(())` on every acknowledged keepalive and every successful
/// publish, and the error on every failure.
pub type ResultCallback = Arc<dyn Fn(Result<(), &ClientError>) + Send + Sync>;

#[derive(Clone)]
pub struct RegisterOptions {
    pub ttl: i64,
    pub namespace: String,
    pub always_update: bool,
    pub interval: Duration,
    pub connect_timeout: Duration,
    pub hook: Option<PrePublishHook>,
    pub callback: Option<ResultCallback>,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL_SECS,
            namespace: DEFAULT_NAMESPACE.to_string(),
            always_update: false,
            interval: DEFAULT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            hook: None,
            callback: None,
        }
    }
}

impl fmt::Debug for RegisterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterOptions")
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .field("always_update", &self.always_update)
            .field("interval", &self.interval)
            .field("connect_timeout", &self.connect_timeout)
            .field("hook", &self.hook.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lease TTL in seconds.
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = if ttl <= 0 { DEFAULT_TTL_SECS } else { ttl };
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let namespace = namespace.trim();
        self.namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE.to_string()
        } else {
            namespace.to_string()
        };
        self
    }

    /// Republish on every interval instead of only when forced.
    pub fn with_always_update(mut self, always_update: bool) -> Self {
        self.always_update = always_update;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = if timeout.is_zero() {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            timeout
        };
        self
    }

    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut NodeDescriptor) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Result<(), &ClientError>) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub(crate) fn report(&self, result: Result<(), &ClientError>) {
        if let Some(callback) = &self.callback {
            callback(result);
        }
    }
}
