use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::{HostAddress, Resource, ResourceType};
use shoal_registry::RegistrySettings;
use thiserror::Error;

pub const CONFIG_FILE: &str = "shoal.toml";
pub const TOKEN_ENV: &str = "SHOAL_REGISTRY_TOKEN";
/// `[registry] url` value selecting an in-process registry.
pub const LOCAL_REGISTRY: &str = "local";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no shoal.toml found (looked in {})", .searched.join(", "))]
    NotFound { searched: Vec<String> },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ShoalConfig {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub discovery: RegistrySettings,
    #[serde(default)]
    pub deploy: DeployConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            token: None,
        }
    }
}

fn default_registry_url() -> String {
    "http://localhost:7400".into()
}

impl RegistryConfig {
    pub fn is_local(&self) -> bool {
        self.url == LOCAL_REGISTRY
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub name: String,
    pub ipv4: Option<String>,
    pub ssh_port: Option<u16>,
    pub ipv6: Option<String>,
    /// Provider descriptors advertised with the host.
    #[serde(default)]
    pub providers: Vec<Value>,
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Port the agent serves registry calls on. No server when unset.
    pub agent_port: Option<u16>,
    #[serde(default, skip_serializing)]
    pub agent_token: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            name: String::new(),
            ipv4: None,
            ssh_port: None,
            ipv6: None,
            providers: Vec::new(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            agent_port: None,
            agent_token: None,
        }
    }
}

fn default_heartbeat_interval() -> u64 {
    5
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Program service sources run through (`node`, `sh`, ...). Sources are
    /// executed directly when unset.
    pub interpreter: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            interpreter: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

/// `~/.shoal`
pub fn shoal_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shoal")
}

impl ShoalConfig {
    /// Load `explicit`, else `./shoal.toml`, else `~/.shoal/shoal.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![PathBuf::from(CONFIG_FILE), shoal_dir().join(CONFIG_FILE)],
        };
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ConfigError::NotFound {
                searched: candidates.iter().map(|p| p.display().to_string()).collect(),
            })?;

        let mut config = Self::from_file(path)?;
        config.apply_env(std::env::var(TOKEN_ENV).ok());
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A non-empty token from the environment wins over the file.
    pub fn apply_env(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.registry.token = Some(token);
        }
    }

    /// Settings of the in-process registry: `[discovery]`, owned by the host
    /// account.
    pub fn local_registry_settings(&self) -> RegistrySettings {
        self.discovery.clone().with_owner(self.host.account.clone())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.host.heartbeat_interval_secs.max(1))
    }

    /// The resource the host agent registers.
    pub fn host_resource(&self) -> Result<Resource, ConfigError> {
        let host = &self.host;
        if host.account.is_empty() || host.name.is_empty() {
            return Err(ConfigError::Invalid(
                "[host] account and name are required".into(),
            ));
        }

        let address = HostAddress {
            ipv4: host.ipv4.clone().filter(|a| !a.is_empty()),
            ssh_port: host.ssh_port.map(|p| p.to_string()),
            ipv6: host.ipv6.clone().filter(|a| !a.is_empty()),
        };
        let providers = match host.providers.as_slice() {
            [] => Value::Null,
            [single] => single.clone(),
            many => Value::Array(many.to_vec()),
        };

        Ok(Resource {
            name: host.name.clone(),
            account: host.account.clone(),
            resource_type: ResourceType::Host,
            address: (!address.is_empty()).then(|| address.to_composite()),
            providers,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_registry::LoadBalancingStrategy;

    #[test]
    fn parses_minimal_config() {
        let config: ShoalConfig = toml::from_str(
            r#"
[host]
account = "acme"
name = "web1"
"#,
        )
        .unwrap();
        assert_eq!(config.registry.url, "http://localhost:7400");
        assert_eq!(config.host.heartbeat_interval_secs, 5);
        assert_eq!(config.discovery.workload_threshold, 85);
        assert_eq!(config.discovery.strategy, LoadBalancingStrategy::EvenWorkload);
        assert_eq!(config.deploy.base_dir, PathBuf::from("."));
    }

    #[test]
    fn parses_full_config() {
        let config: ShoalConfig = toml::from_str(
            r#"
[registry]
url = "https://registry.internal:7400"
token = "file-token"

[host]
account = "acme"
name = "web1"
ipv4 = "10.0.0.5"
ssh_port = 22
heartbeat_interval_secs = 15
agent_port = 7401
agent_token = "agent-secret"
providers = [{ name = "local", public = { host = "10.0.0.5", port = 8080 } }]

[discovery]
workload_threshold = 70
strategy = "workloadFocusing"
default_expire_in_seconds = 300
admin_accounts = ["ops"]

[deploy]
base_dir = "/srv/shoal"
interpreter = "node"
"#,
        )
        .unwrap();
        assert_eq!(config.registry.token.as_deref(), Some("file-token"));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert_eq!(config.discovery.strategy, LoadBalancingStrategy::WorkloadFocusing);
        assert!(config.discovery.is_admin("ops"));
        assert_eq!(config.deploy.base_dir, PathBuf::from("/srv/shoal"));
        assert_eq!(config.deploy.interpreter.as_deref(), Some("node"));
        assert_eq!(config.host.agent_port, Some(7401));
        assert!(!config.registry.is_local());

        let resource = config.host_resource().unwrap();
        assert_eq!(resource.address.as_deref(), Some("(10.0.0.5,22,)"));
        assert_eq!(resource.providers["public"]["port"], 8080);
    }

    #[test]
    fn env_token_overrides_file() {
        let mut config: ShoalConfig =
            toml::from_str("[registry]\ntoken = \"file-token\"\n").unwrap();
        config.apply_env(Some(String::new()));
        assert_eq!(config.registry.token.as_deref(), Some("file-token"));
        config.apply_env(Some("env-token".into()));
        assert_eq!(config.registry.token.as_deref(), Some("env-token"));
    }

    #[test]
    fn local_registry_is_owned_by_the_host_account() {
        let config: ShoalConfig = toml::from_str(
            r#"
[registry]
url = "local"

[host]
account = "acme"
name = "web1"

[discovery]
workload_threshold = 60
"#,
        )
        .unwrap();
        assert!(config.registry.is_local());
        let settings = config.local_registry_settings();
        assert!(settings.is_admin("acme"));
        assert_eq!(settings.workload_threshold, 60);
    }

    #[test]
    fn host_identity_is_required() {
        let config = ShoalConfig::default();
        assert!(matches!(config.host_resource(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn host_without_addresses_has_no_composite() {
        let mut config = ShoalConfig::default();
        config.host.account = "acme".into();
        config.host.name = "web1".into();
        let resource = config.host_resource().unwrap();
        assert!(resource.address.is_none());
        assert!(resource.providers.is_null());
    }

    #[test]
    fn missing_explicit_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShoalConfig::load(Some(&dir.path().join("shoal.toml"))).unwrap_err();
        assert!(err.to_string().contains("shoal.toml"));
    }

    #[test]
    fn loads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[host]\naccount = \"acme\"\nname = \"db1\"\n").unwrap();
        let config = ShoalConfig::load(Some(&path)).unwrap();
        assert_eq!(config.host.name, "db1");
    }
}
