use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application name reserved for services that belong to the control plane
/// itself. These have no persisted `Service` row.
pub const CONTROL_PLANE_APPLICATION: &str = "sardines";

/// Wildcard element accepted in version strings and filter lists.
pub const WILDCARD: &str = "*";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    #[default]
    Host,
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Host => "host",
            ResourceType::Other => "other",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Unregistered,
    Ready,
    Degraded,
    Unreachable,
}

/// A host or other infrastructure unit.
///
/// `(account, name)` identifies a resource until the store assigns `id`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub account: String,
    #[serde(rename = "type", default)]
    pub resource_type: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_megabytes: Option<u64>,
    #[serde(default)]
    pub status: ResourceStatus,
    /// Composite `(ipv4,ssh_port,ipv6)` form, see [`crate::host::HostAddress`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// A single provider descriptor or a list of them.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub providers: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active_on: Option<DateTime<Utc>>,
}

/// One declared parameter of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceArgument {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: String,
}

/// A registered service definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub owner: String,
    pub application: String,
    pub module: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub arguments: Vec<ServiceArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_access_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    /// The provider is publicly reachable; clients connect directly.
    Dedicated,
    /// Calls must go through a proxy.
    Proxy,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeStatus {
    #[default]
    Ready,
    NotReady,
}

impl RuntimeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeStatus::Ready => "ready",
            RuntimeStatus::NotReady => "not_ready",
        }
    }
}

/// One binding of a service to a resource through a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRuntime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    pub resource_id: String,
    pub application: String,
    pub module: String,
    pub name: String,
    pub version: String,
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_for_provider: Option<Value>,
    #[serde(default)]
    pub status: RuntimeStatus,
    #[serde(default)]
    pub workload_percentage: u8,
    pub expire_in_seconds: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Identity a client asks the registry to resolve.
///
/// A missing version, or `*`, means any version.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ServiceIdentity {
    pub fn new(
        application: impl Into<String>,
        module: impl Into<String>,
        name: impl Into<String>,
        version: Option<String>,
    ) -> Self {
        Self {
            application: application.into(),
            module: module.into(),
            name: name.into(),
            version,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.application.is_empty() && !self.module.is_empty() && !self.name.is_empty()
    }

    /// The concrete version requested, or `None` for "any version".
    pub fn pinned_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .filter(|v| !v.is_empty() && *v != WILDCARD)
    }

    pub fn is_control_plane(&self) -> bool {
        self.application == CONTROL_PLANE_APPLICATION
    }
}

impl std::fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}@{}",
            self.application,
            self.module,
            self.name,
            self.version.as_deref().unwrap_or(WILDCARD)
        )
    }
}

/// One provider that accepted a service during a deploy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub provider_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_info: Option<Value>,
    /// The provider definition as written in the plan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_for_provider: Option<Value>,
}

/// A deployed service and every provider entry it was bound to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeRecord {
    pub identity: ServiceIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub arguments: Vec<ServiceArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    pub entries: Vec<RuntimeEntry>,
}

/// Application name to the runtime records produced for it.
pub type DeployResult = std::collections::BTreeMap<String, Vec<RuntimeRecord>>;

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuLoad {
    pub count: u32,
    #[serde(default)]
    pub usage_percent: f32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemLoad {
    /// Megabytes.
    pub total: u64,
    #[serde(default)]
    pub used: u64,
}

/// Heartbeat payload sent by a host agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSample {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub name: String,
    pub account: String,
    pub cpu: CpuLoad,
    pub mem: MemLoad,
    pub sampled_at: DateTime<Utc>,
}

impl LoadSample {
    /// Busiest of CPU and memory, clamped to 0..=100.
    pub fn workload_percentage(&self) -> u8 {
        let mem = if self.mem.total > 0 {
            self.mem.used as f64 / self.mem.total as f64 * 100.0
        } else {
            0.0
        };
        let cpu = f64::from(self.cpu.usage_percent);
        cpu.max(mem).clamp(0.0, 100.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f32, used: u64, total: u64) -> LoadSample {
        LoadSample {
            resource_id: None,
            name: "web1".into(),
            account: "acme".into(),
            cpu: CpuLoad {
                count: 4,
                usage_percent: cpu,
            },
            mem: MemLoad { total, used },
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn workload_takes_busiest_dimension() {
        assert_eq!(sample(20.0, 512, 1024).workload_percentage(), 50);
        assert_eq!(sample(73.4, 100, 1024).workload_percentage(), 73);
    }

    #[test]
    fn workload_handles_unknown_memory_total() {
        assert_eq!(sample(12.0, 0, 0).workload_percentage(), 12);
        assert_eq!(sample(180.0, 0, 0).workload_percentage(), 100);
    }

    #[test]
    fn wildcard_version_is_unpinned() {
        let any = ServiceIdentity::new("shop", "cart", "add", Some("*".into()));
        assert_eq!(any.pinned_version(), None);
        let pinned = ServiceIdentity::new("shop", "cart", "add", Some("1.2.0".into()));
        assert_eq!(pinned.pinned_version(), Some("1.2.0"));
        assert!(!ServiceIdentity::new("shop", "", "add", None).is_complete());
    }

    #[test]
    fn resource_row_uses_type_key() {
        let resource = Resource {
            name: "web1".into(),
            account: "acme".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&resource).unwrap();
        assert_eq!(json["type"], "host");
        assert_eq!(json["status"], "unregistered");
        assert!(json.get("id").is_none());
    }
}
