//! Registry configuration
//!
//! Loaded from a YAML/TOML file layered with `BEACON__*` environment
//! variables, then normalised so every derived value is usable as is.

use std::path::Path;
use std::time::Duration;

use beacon_api::{NodeDescriptor, ServiceEndpoint, SubscribedService};
use beacon_common::{BeaconError, DEFAULT_NAMESPACE, local_ip, utils::trim_non_empty};
use config::{Config, Environment, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::registration::RegisterOptions;
use crate::registration::options::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_TTL_SECS};

const ENV_PREFIX: &str = "BEACON";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_TIMEOUT_SECS: i64 = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSection {
    pub name: String,
    pub state: String,
    pub node_id: String,
    pub version: String,
    pub private_ip: String,
    pub public_ip: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterSection {
    /// Refresh interval in seconds
    pub interval: i64,
    /// Lease TTL in seconds
    pub ttl: i64,
    pub namespace: String,
    pub global: GlobalSection,
    pub services: Vec<ServiceEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscribeSection {
    pub services: Vec<SubscribedService>,
}

/// Store endpoints and credentials that replace the configured ones.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredefinedEndpoints {
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub endpoints: Vec<String>,
    pub username: String,
    pub password: String,
    /// Store call timeout in seconds
    pub timeout: i64,
    pub register: Option<RegisterSection>,
    pub subscribe: Option<SubscribeSection>,
}

impl RegistryConfig {
    /// Load `path` (format from its extension) plus environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let builder = Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(env_source());
        let mut conf: RegistryConfig = builder.build()?.try_deserialize()?;
        conf.normalize();
        Ok(conf)
    }

    /// Parse configuration text without consulting the environment.
    pub fn from_content(content: &str, format: FileFormat) -> Result<Self> {
        let mut conf: RegistryConfig = Config::builder()
            .add_source(config::File::from_str(content, format))
            .build()?
            .try_deserialize()?;
        conf.normalize();
        Ok(conf)
    }

    /// Fill defaults and clean up values after loading.
    pub fn normalize(&mut self) {
        self.username = self.username.trim().to_string();
        self.password = self.password.trim().to_string();
        if self.timeout <= 0 {
            self.timeout = DEFAULT_TIMEOUT_SECS;
        }
        self.endpoints = trim_non_empty(&self.endpoints);

        if let Some(register) = self.register.as_mut() {
            register.namespace = register.namespace.trim().to_string();
            if register.namespace.is_empty() {
                register.namespace = DEFAULT_NAMESPACE.to_string();
            }
            if register.ttl == 0 {
                register.ttl = DEFAULT_TTL_SECS;
            }
            if register.interval == 0 {
                register.interval = DEFAULT_INTERVAL.as_secs() as i64;
            }

            let global = &mut register.global;
            global.private_ip = global.private_ip.trim().to_string();
            global.public_ip = global.public_ip.trim().to_string();
            if global.private_ip.is_empty() {
                global.private_ip = local_ip();
            }
            if global.node_id.is_empty() {
                global.node_id = uuid::Uuid::new_v4().to_string();
            }
        }

        let inherited = self
            .register
            .as_ref()
            .map(|r| r.namespace.clone())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        if let Some(subscribe) = self.subscribe.as_mut() {
            for service in subscribe.services.iter_mut() {
                if service.namespace.is_empty() {
                    service.namespace = inherited.clone();
                }
            }
        }
    }

    pub fn apply_predefined_endpoints(&mut self, predefined: &PredefinedEndpoints) {
        self.endpoints = trim_non_empty(&predefined.endpoints);
        self.username = predefined.username.trim().to_string();
        self.password = predefined.password.trim().to_string();
    }

    /// Replace the registered version; ignored when empty.
    pub fn override_register_version(&mut self, version: &str) {
        if version.is_empty() {
            return;
        }
        if let Some(register) = self.register.as_mut() {
            register.global.version = version.to_string();
        }
    }

    /// Replace the version of a subscribed service, matched case-insensitively.
    pub fn override_subscribe_version(&mut self, name: &str, version: &str) -> bool {
        let Some(subscribe) = self.subscribe.as_mut() else {
            return false;
        };
        match subscribe
            .services
            .iter_mut()
            .find(|s| s.name.eq_ignore_ascii_case(name))
        {
            Some(service) => {
                service.version = version.to_string();
                true
            }
            None => false,
        }
    }

    pub fn set_private_ip(&mut self, ip: impl Into<String>) {
        if let Some(register) = self.register.as_mut() {
            register.global.private_ip = ip.into();
        }
    }

    pub fn set_public_ip(&mut self, ip: impl Into<String>) {
        if let Some(register) = self.register.as_mut() {
            register.global.public_ip = ip.into();
        }
    }

    pub fn set_node_id(&mut self, node_id: impl Into<String>) {
        if let Some(register) = self.register.as_mut() {
            register.global.node_id = node_id.into();
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        if self.timeout <= 0 {
            DEFAULT_CONNECT_TIMEOUT
        } else {
            Duration::from_secs(self.timeout as u64)
        }
    }

    /// Registration options derived from the register section.
    pub fn register_options(&self) -> RegisterOptions {
        let options = RegisterOptions::new().with_connect_timeout(self.connect_timeout());
        match &self.register {
            Some(register) => options
                .with_ttl(register.ttl)
                .with_namespace(register.namespace.clone())
                .with_interval(Duration::from_secs(register.interval.max(0) as u64)),
            None => options,
        }
    }

    /// The local node's descriptor, validated.
    pub fn local_descriptor(&self) -> Result<NodeDescriptor> {
        let register = self
            .register
            .as_ref()
            .ok_or_else(|| BeaconError::ConfigError("register section is missing".to_string()))?;
        let global = &register.global;

        let mut descriptor = NodeDescriptor::new(
            global.name.clone(),
            global.node_id.clone(),
            global.version.clone(),
            global.private_ip.clone(),
        );
        descriptor.global.public_ip = global.public_ip.clone();
        descriptor.global.state = global.state.clone();
        descriptor.endpoints = register.services.clone();
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn subscribed_services(&self) -> Result<Vec<SubscribedService>> {
        let subscribe = self
            .subscribe
            .as_ref()
            .ok_or_else(|| BeaconError::ConfigError("subscribe section is missing".to_string()))?;
        Ok(subscribe.services.clone())
    }

    pub fn subscribed_names(&self) -> Vec<String> {
        self.subscribe
            .as_ref()
            .map(|s| s.services.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default()
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .list_separator(",")
        .with_list_parse_key("endpoints")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ClientError;

    const SAMPLE: &str = r#"
endpoints: [" 10.0.0.5:2379 ", "", "10.0.0.6:2379"]
username: " admin "
password: " secret "
timeout: 0
register:
  namespace: " "
  global:
    name: orders
    state: ONLINE
    version: 1.4.0
    private_ip: 10.0.0.1
  services:
    - name: http
      port: 8080
subscribe:
  services:
    - name: billing
      version: "2.0"
    - name: gateway
      namespace: edge
"#;

    fn sample() -> RegistryConfig {
        RegistryConfig::from_content(SAMPLE, FileFormat::Yaml).unwrap()
    }

    #[test]
    fn test_normalize_fills_defaults() {
        let conf = sample();
        assert_eq!(conf.endpoints, vec!["10.0.0.5:2379", "10.0.0.6:2379"]);
        assert_eq!(conf.username, "admin");
        assert_eq!(conf.password, "secret");
        assert_eq!(conf.timeout, 2);

        let register = conf.register.as_ref().unwrap();
        assert_eq!(register.namespace, "voice");
        assert_eq!(register.ttl, 6);
        assert_eq!(register.interval, 2);
        // generated node id
        assert!(uuid::Uuid::parse_str(&register.global.node_id).is_ok());
    }

    #[test]
    fn test_subscribe_namespace_inherits() {
        let conf = sample();
        let services = conf.subscribed_services().unwrap();
        assert_eq!(services[0].namespace, "voice");
        assert_eq!(services[1].namespace, "edge");
        assert_eq!(conf.subscribed_names(), vec!["billing", "gateway"]);

        let conf = RegistryConfig::from_content(
            "subscribe:\n  services:\n    - name: billing\n",
            FileFormat::Yaml,
        )
        .unwrap();
        assert_eq!(conf.subscribed_services().unwrap()[0].namespace, "voice");
    }

    #[test]
    fn test_empty_private_ip_resolves_locally() {
        let conf = RegistryConfig::from_content(
            "register:\n  global:\n    name: orders\n    version: '1'\n",
            FileFormat::Yaml,
        )
        .unwrap();
        let register = conf.register.unwrap();
        assert!(!register.global.private_ip.is_empty());
    }

    #[test]
    fn test_local_descriptor() {
        let mut conf = sample();
        conf.set_node_id("n1");
        conf.set_public_ip("1.2.3.4");

        let desc = conf.local_descriptor().unwrap();
        assert_eq!(desc.service_name(), "orders");
        assert_eq!(desc.node_id(), "n1");
        assert_eq!(desc.global.public_ip, "1.2.3.4");
        assert_eq!(desc.state(), "ONLINE");
        assert_eq!(desc.port("http", 0), 8080);
    }

    #[test]
    fn test_local_descriptor_requires_fields() {
        let mut conf = sample();
        if let Some(register) = conf.register.as_mut() {
            register.global.version.clear();
        }
        let err = conf.local_descriptor().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Common(BeaconError::MissingField("global.version"))
        ));

        let conf = RegistryConfig::default();
        assert!(matches!(
            conf.local_descriptor(),
            Err(ClientError::Common(BeaconError::ConfigError(_)))
        ));
        assert!(conf.subscribed_services().is_err());
        assert!(conf.subscribed_names().is_empty());
    }

    #[test]
    fn test_register_options() {
        let mut conf = sample();
        if let Some(register) = conf.register.as_mut() {
            register.ttl = 10;
            register.interval = 5;
            register.namespace = "staging".to_string();
        }
        conf.timeout = 4;

        let options = conf.register_options();
        assert_eq!(options.ttl, 10);
        assert_eq!(options.namespace, "staging");
        assert_eq!(options.interval, Duration::from_secs(5));
        assert_eq!(options.connect_timeout, Duration::from_secs(4));
    }

    #[test]
    fn test_overrides() {
        let mut conf = sample();
        conf.apply_predefined_endpoints(&PredefinedEndpoints {
            endpoints: vec!["etcd-0:2379".to_string(), " ".to_string()],
            username: "root".to_string(),
            password: "pw".to_string(),
        });
        assert_eq!(conf.endpoints, vec!["etcd-0:2379"]);
        assert_eq!(conf.username, "root");

        conf.override_register_version("");
        assert_eq!(conf.register.as_ref().unwrap().global.version, "1.4.0");
        conf.override_register_version("1.5.0");
        assert_eq!(conf.register.as_ref().unwrap().global.version, "1.5.0");

        assert!(conf.override_subscribe_version("BILLING", "3.0"));
        assert!(!conf.override_subscribe_version("unknown", "1.0"));
        assert_eq!(conf.subscribed_services().unwrap()[0].version, "3.0");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let conf = RegistryConfig::load(file.path()).unwrap();
        assert_eq!(conf.register.unwrap().global.name, "orders");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = RegistryConfig::load("/nonexistent/beacon.yml").unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }
}
