//! Deploy plan and service definition documents.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::ServiceArgument;

use crate::error::DeployError;

/// Location type under which an application's code is read from disk.
pub const FILE_LOCATION: &str = "file";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPlan {
    #[serde(default)]
    pub providers: Vec<ProviderDefinition>,
    pub applications: Vec<ApplicationDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDefinition {
    /// Definitions without a code name are ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ProviderCode>,
    /// Passed to the provider constructor. `public` holds connection info
    /// for providers reachable without a proxy.
    #[serde(default)]
    pub provider_settings: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub application_settings: Vec<ApplicationSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSettings {
    pub application: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_settings: Vec<ServiceSettingOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSettingOverride {
    pub module: String,
    pub name: String,
    #[serde(default)]
    pub settings: Value,
}

fn merge(base: Option<&Value>, overlay: Option<&Value>) -> Option<Value> {
    match (base, overlay) {
        (None, None) => None,
        (Some(v), None) | (None, Some(v)) => Some(v.clone()),
        (Some(Value::Object(base)), Some(Value::Object(overlay))) => {
            let mut merged = base.clone();
            merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(Value::Object(merged))
        }
        (Some(_), Some(overlay)) => Some(overlay.clone()),
    }
}

impl ProviderDefinition {
    pub fn name(&self) -> Option<&str> {
        self.code
            .as_ref()
            .map(|c| c.name.as_str())
            .filter(|n| !n.is_empty())
    }

    pub fn public_info(&self) -> Option<&Value> {
        self.provider_settings
            .get("public")
            .filter(|v| !v.is_null())
    }

    /// Settings this provider applies to one service: the application's
    /// common settings overlaid with the first override for `(module, name)`.
    /// Only the first settings entry for the application is consulted.
    /// Common settings apply on their own when no override matches.
    pub fn effective_settings(&self, application: &str, module: &str, name: &str) -> Option<Value> {
        let app = self
            .application_settings
            .iter()
            .find(|s| s.application == application)?;
        let service = app
            .service_settings
            .iter()
            .find(|s| s.module == module && s.name == name)
            .map(|s| &s.settings)
            .filter(|s| !s.is_null());
        merge(app.common_settings.as_ref(), service)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitEntry {
    /// `module/name` of a service declared by the same application.
    pub service: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDefinition {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeLocation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<InitEntry>,
}

impl ApplicationDefinition {
    /// Code directory, when the code lives on the local filesystem.
    pub fn code_dir(&self, base_dir: &Path) -> Option<std::path::PathBuf> {
        let code = self.code.as_ref()?;
        let local = code
            .location_type
            .as_deref()
            .is_none_or(|t| t == FILE_LOCATION);
        match (&code.location, local) {
            (Some(location), true) if !location.is_empty() => Some(base_dir.join(location)),
            _ => None,
        }
    }
}

/// A service an application contributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    pub name: String,
    pub module: String,
    /// Source path relative to the application's code location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,
    #[serde(default)]
    pub arguments: Vec<ServiceArgument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl ServiceDefinition {
    /// `module/name`, the key `init` entries use.
    pub fn key(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationServices {
    pub application: String,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

/// Application name to its declared services, in declaration order.
pub fn services_by_application(
    definitions: &[ApplicationServices],
) -> HashMap<&str, Vec<&ServiceDefinition>> {
    let mut map: HashMap<&str, Vec<&ServiceDefinition>> = HashMap::new();
    for app in definitions {
        map.entry(app.application.as_str())
            .or_default()
            .extend(app.services.iter());
    }
    map
}

pub async fn load_plan(path: &Path) -> Result<Value, DeployError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DeployError::PlanUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_str(&content).map_err(|e| DeployError::InvalidPlan(e.to_string()))
}

/// Overview of a plan, as printed by `shoal check-plan`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub providers: Vec<String>,
    pub applications: Vec<ApplicationSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub services: Vec<String>,
    pub init_steps: usize,
}

impl PlanSummary {
    pub fn new(plan: &DeployPlan, definitions: &[ApplicationServices]) -> Self {
        let services = services_by_application(definitions);
        Self {
            providers: plan
                .providers
                .iter()
                .filter_map(ProviderDefinition::name)
                .map(str::to_string)
                .collect(),
            applications: plan
                .applications
                .iter()
                .map(|app| ApplicationSummary {
                    name: app.name.clone(),
                    version: app.version.clone(),
                    services: services
                        .get(app.name.as_str())
                        .map(|list| list.iter().map(|s| s.key()).collect())
                        .unwrap_or_default(),
                    init_steps: app.init.len(),
                })
                .collect(),
        }
    }
}
