// Descriptor model for service registration and discovery
// This file defines the record a node publishes under its lease and the
// subscription entries a consumer watches

use beacon_common::{BeaconError, DEFAULT_NAMESPACE, KEY_PREFIX, STATE_ONLINE, service_prefix};
use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

use crate::state::NodeState;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// Identity block of a descriptor
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalInfo {
    pub name: String,
    pub state: String,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub version: String,
    #[serde(rename = "privateIP")]
    pub private_ip: String,
    #[serde(rename = "publicIP")]
    pub public_ip: String,
    /// Milliseconds since the Unix epoch, as a decimal string
    pub timestamp: String,
}

impl GlobalInfo {
    pub fn refresh_timestamp(&mut self, millis: i64) {
        self.timestamp = millis.to_string();
    }

    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp.parse().ok()
    }
}

// Named port exposed by a node
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceEndpoint {
    pub name: String,
    pub port: i32,
}

impl ServiceEndpoint {
    pub fn new(name: impl Into<String>, port: i32) -> Self {
        Self {
            name: name.into(),
            port,
        }
    }
}

// Load hints published alongside the identity; not interpreted by the registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceProfile {
    pub cpu: i64,
    pub io: i64,
    pub disk: i64,
    pub memory: i64,
    pub socket: i64,
}

/// Self-describing record a node publishes and its peers consume.
///
/// The JSON layout is stable: `global`, `SvcInfo`, `profile`, `private`.
/// `private` is carried as raw JSON and round-tripped byte for byte.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(default)]
    pub global: GlobalInfo,
    #[serde(rename = "SvcInfo", default, deserialize_with = "null_as_default")]
    pub endpoints: Vec<ServiceEndpoint>,
    #[serde(default)]
    pub profile: ResourceProfile,
    #[serde(rename = "private", default)]
    pub private: Option<Box<RawValue>>,
}

impl PartialEq for NodeDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.global == other.global
            && self.endpoints == other.endpoints
            && self.profile == other.profile
            && self.private.as_ref().map(|v| v.get()) == other.private.as_ref().map(|v| v.get())
    }
}

impl NodeDescriptor {
    pub fn new(
        name: impl Into<String>,
        node_id: impl Into<String>,
        version: impl Into<String>,
        private_ip: impl Into<String>,
    ) -> Self {
        Self {
            global: GlobalInfo {
                name: name.into(),
                node_id: node_id.into(),
                version: version.into(),
                private_ip: private_ip.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn service_name(&self) -> &str {
        &self.global.name
    }

    pub fn node_id(&self) -> &str {
        &self.global.node_id
    }

    pub fn state(&self) -> &str {
        &self.global.state
    }

    /// Case-insensitive state comparison.
    pub fn is_state(&self, state: &str) -> bool {
        self.global.state.eq_ignore_ascii_case(state)
    }

    pub fn is_online(&self) -> bool {
        self.is_state(STATE_ONLINE)
    }

    /// Ensure the fields the key and the peers depend on are present.
    pub fn validate(&self) -> Result<(), BeaconError> {
        if self.global.name.is_empty() {
            return Err(BeaconError::MissingField("global.name"));
        }
        if self.global.node_id.is_empty() {
            return Err(BeaconError::MissingField("global.nodeId"));
        }
        if self.global.version.is_empty() {
            return Err(BeaconError::MissingField("global.version"));
        }
        if self.global.private_ip.is_empty() {
            return Err(BeaconError::MissingField("global.privateIP"));
        }
        Ok(())
    }

    /// Hex MD5 of `privateIP + nodeId`; stable across restarts iff both are.
    pub fn unique_id(&self) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.global.private_ip.as_bytes());
        hasher.update(self.global.node_id.as_bytes());
        const_hex::encode(hasher.finalize())
    }

    /// Store key of this descriptor: `registry.<namespace>.<service>.<unique_id>`.
    pub fn register_key(&self, namespace: &str) -> String {
        let namespace = if namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            namespace
        };
        format!(
            "{}{}",
            service_prefix(namespace, self.service_name()),
            self.unique_id()
        )
    }

    /// Stamp state and timestamp ahead of a publish.
    pub fn stamp(&mut self, state: &NodeState, now_millis: i64) {
        self.global.state = state.as_str().to_string();
        self.global.refresh_timestamp(now_millis);
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    /// Deep copy; the private payload is dropped unless `include_private`.
    pub fn snapshot(&self, include_private: bool) -> Self {
        Self {
            global: self.global.clone(),
            endpoints: self.endpoints.clone(),
            profile: self.profile.clone(),
            private: if include_private {
                self.private.clone()
            } else {
                None
            },
        }
    }

    /// Endpoint lookup, case-insensitive on the endpoint name.
    pub fn endpoint(&self, name: &str) -> Option<&ServiceEndpoint> {
        self.endpoints
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn port(&self, name: &str, default_port: i32) -> i32 {
        self.endpoint(name).map(|e| e.port).unwrap_or(default_port)
    }

    /// Serialize `value` into the private payload.
    pub fn set_private<T: Serialize>(&mut self, value: &T) -> serde_json::Result<()> {
        self.private = Some(serde_json::value::to_raw_value(value)?);
        Ok(())
    }

    /// Install an already-encoded JSON payload.
    pub fn set_private_raw(&mut self, json: String) -> serde_json::Result<()> {
        self.private = Some(RawValue::from_string(json)?);
        Ok(())
    }

    pub fn private_raw(&self) -> Option<&str> {
        self.private.as_ref().map(|v| v.get())
    }

    /// Decode the private payload; `None` when absent or `null`.
    pub fn private_as<T: DeserializeOwned>(&self) -> serde_json::Result<Option<T>> {
        match self.private_raw() {
            None | Some("null") => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some),
        }
    }
}

/// A service this process watches, with the namespace it lives in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribedService {
    pub namespace: String,
    pub name: String,
    /// Version the subscriber was built against; informational
    pub version: String,
}

impl SubscribedService {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// Key prefix covering every node of this service.
    pub fn prefix(&self) -> String {
        let namespace = if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        };
        service_prefix(namespace, &self.name)
    }
}

/// Split a descriptor key into `(namespace, service, unique_id)`.
///
/// Returns `None` for keys outside the registry layout. Namespace and unique
/// id never contain a separator, so a dotted service name still parses.
pub fn parse_register_key(key: &str) -> Option<(&str, &str, &str)> {
    let rest = key.strip_prefix(KEY_PREFIX)?.strip_prefix('.')?;
    let (namespace, rest) = rest.split_once('.')?;
    let (service, unique_id) = rest.rsplit_once('.')?;
    if namespace.is_empty() || service.is_empty() || unique_id.is_empty() {
        return None;
    }
    Some((namespace, service, unique_id))
}
