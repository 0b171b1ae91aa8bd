//! Write paths fed by owners and host agents: service registration, host
//! registration, heartbeats and deploy-result uploads.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::store::{Row, from_row, to_row};
use shoal_core::{
    DeployResult, Filter, LoadSample, Query, Resource, ResourceStatus, RuntimeStatus, Service,
    ServiceIdentity, ServiceRuntime, Table,
};

use crate::Registry;
use crate::error::RegistryError;

/// What a heartbeat changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatAck {
    pub resource_id: String,
    pub workload_percentage: u8,
    pub service_runtimes: u64,
}

fn patch_of<T: Serialize>(value: &T) -> Result<Row, RegistryError> {
    let mut row = to_row(value)?;
    row.remove("id");
    Ok(row)
}

impl Registry {
    /// Register a service definition, or refresh the existing row with the
    /// same owner and discovery key. Returns the service id.
    pub async fn register_service(
        &self,
        mut service: Service,
        token: &str,
    ) -> Result<String, RegistryError> {
        let caller = self.authenticate(token).await?;
        if service.owner.is_empty() {
            service.owner = caller.account_id;
        }
        let identity = ServiceIdentity::new(
            service.application.clone(),
            service.module.clone(),
            service.name.clone(),
            Some(service.version.clone()),
        );
        if !identity.is_complete() || service.version.is_empty() {
            return Err(RegistryError::InvalidIdentity(identity.to_string()));
        }

        let key = Filter::new()
            .eq("owner", service.owner.as_str())
            .eq("application", service.application.as_str())
            .eq("module", service.module.as_str())
            .eq("name", service.name.as_str())
            .eq("version", service.version.as_str());

        if let Some(existing) = self.store.get_one(Table::Service, key.clone()).await? {
            let existing: Service = from_row(Table::Service, existing)?;
            if let Some(id) = existing.id {
                let mut patch = Row::new();
                patch.insert("source".into(), Value::from(service.source));
                patch.insert("arguments".into(), serde_json::to_value(&service.arguments)?);
                patch.insert(
                    "return_type".into(),
                    service.return_type.map_or(Value::Null, Value::from),
                );
                self.store.set(Table::Service, Some(patch), &key).await?;
                tracing::debug!(service = %identity, id = %id, "Service definition refreshed");
                return Ok(id);
            }
        }

        let now = Utc::now();
        service.id = None;
        service.create_on = Some(now);
        service.last_access_on = Some(now);
        let id = self.store.insert(Table::Service, to_row(&service)?).await?;
        tracing::info!(service = %identity, id = %id, "Service registered");
        Ok(id)
    }

    /// Latest service matching the identity. A hit bumps `last_access_on`.
    pub async fn query_service(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Option<Service>, RegistryError> {
        let service = self.find_service(identity).await?;
        if let Some(id) = service.as_ref().and_then(|s| s.id.as_deref()) {
            self.touch_service(id).await?;
        }
        Ok(service)
    }

    /// Create or refresh a resource row. Hosts are matched by id when known,
    /// else by `(account, name)`. Returns the resource id.
    pub async fn update_resource_info(
        &self,
        resource: &Resource,
        token: &str,
    ) -> Result<String, RegistryError> {
        self.authenticate(token).await?;
        if resource.name.is_empty() || resource.account.is_empty() {
            return Err(RegistryError::InvalidResource(
                "account and name are required".into(),
            ));
        }

        let key = match &resource.id {
            Some(id) => Filter::new().eq("id", id.as_str()),
            None => Filter::new()
                .eq("account", resource.account.as_str())
                .eq("name", resource.name.as_str())
                .eq("type", resource.resource_type.as_str()),
        };

        let mut row = patch_of(resource)?;
        row.insert("last_active_on".into(), serde_json::to_value(Utc::now())?);

        let existing = self
            .store
            .get(Table::Resource, &Query::new(key.clone()).project(["id"]).limit(1))
            .await?
            .into_iter()
            .next()
            .and_then(|r| r.get("id").and_then(Value::as_str).map(str::to_string));

        let id = match existing {
            Some(id) => {
                self.store
                    .set(Table::Resource, Some(row), &Filter::new().eq("id", id.as_str()))
                    .await?;
                id
            }
            None => {
                if let Some(id) = &resource.id {
                    row.insert("id".into(), Value::from(id.as_str()));
                }
                self.store.insert(Table::Resource, row).await?
            }
        };
        tracing::info!(
            host_id = %id,
            account = %resource.account,
            name = %resource.name,
            "Resource info updated"
        );
        Ok(id)
    }

    /// Record a load sample for a registered resource and propagate its
    /// workload to the runtimes it hosts.
    pub async fn resource_heartbeat(
        &self,
        sample: &LoadSample,
        token: &str,
    ) -> Result<HeartbeatAck, RegistryError> {
        self.authenticate(token).await?;
        let Some(resource_id) = sample.resource_id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(RegistryError::InvalidResource(
                "heartbeat without resource_id".into(),
            ));
        };
        let workload = sample.workload_percentage();

        let patch = to_row(&serde_json::json!({
            "workload_percentage": workload,
            "last_active_on": sample.sampled_at,
            "status": ResourceStatus::Ready,
        }))?;
        let hosts = self
            .store
            .set(Table::Resource, Some(patch), &Filter::new().eq("id", resource_id))
            .await?;
        if hosts == 0 {
            return Err(RegistryError::HostNotFound(resource_id.to_string()));
        }

        let patch = to_row(&serde_json::json!({ "workload_percentage": workload }))?;
        let service_runtimes = self
            .store
            .set(
                Table::ServiceRuntime,
                Some(patch),
                &Filter::new().eq("resource_id", resource_id),
            )
            .await?;

        tracing::debug!(host_id = resource_id, workload, service_runtimes, "Heartbeat recorded");
        self.metrics.record_heartbeat(workload);
        Ok(HeartbeatAck {
            resource_id: resource_id.to_string(),
            workload_percentage: workload,
            service_runtimes,
        })
    }

    /// Persist a deploy run for the host it ran on. Missing services are
    /// registered on the way; re-uploading replaces the host's earlier rows
    /// for the same service. Returns the ids of the runtime rows created.
    pub async fn upload_service_deploy_result(
        &self,
        result: &DeployResult,
        resource_id: &str,
        token: &str,
    ) -> Result<Vec<String>, RegistryError> {
        let caller = self.authenticate(token).await?;
        let Some(host) = self
            .store
            .get_one(Table::Resource, Filter::new().eq("id", resource_id))
            .await?
        else {
            return Err(RegistryError::HostNotFound(resource_id.to_string()));
        };
        let host: Resource = from_row(Table::Resource, host)?;
        let workload = host.workload_percentage.unwrap_or(0);

        let mut created = Vec::new();
        for (application, records) in result {
            for record in records {
                let mut identity = record.identity.clone();
                if identity.application.is_empty() {
                    identity.application = application.clone();
                }
                let version = identity
                    .pinned_version()
                    .map(str::to_string)
                    .unwrap_or_else(|| "*".to_string());

                let service_id = if identity.is_control_plane() {
                    None
                } else {
                    let service = Service {
                        id: None,
                        owner: caller.account_id.clone(),
                        application: identity.application.clone(),
                        module: identity.module.clone(),
                        name: identity.name.clone(),
                        version: version.clone(),
                        source: record.source.clone().unwrap_or_default(),
                        arguments: record.arguments.clone(),
                        return_type: record.return_type.clone(),
                        create_on: None,
                        last_access_on: None,
                    };
                    Some(self.register_service(service, token).await?)
                };

                let mut stale = Filter::new()
                    .eq("resource_id", resource_id)
                    .eq("application", identity.application.as_str())
                    .eq("module", identity.module.as_str())
                    .eq("name", identity.name.as_str());
                if let Some(service_id) = &service_id {
                    stale = stale.eq("service_id", service_id.as_str());
                }
                self.store.set(Table::ServiceRuntime, None, &stale).await?;

                for entry in &record.entries {
                    let runtime = ServiceRuntime {
                        id: None,
                        service_id: service_id.clone(),
                        resource_id: resource_id.to_string(),
                        application: identity.application.clone(),
                        module: identity.module.clone(),
                        name: identity.name.clone(),
                        version: version.clone(),
                        entry_type: entry.entry_type,
                        provider_info: entry.provider_info.clone(),
                        provider_raw: entry.provider_raw.clone(),
                        settings_for_provider: entry.settings_for_provider.clone(),
                        status: RuntimeStatus::Ready,
                        workload_percentage: workload,
                        expire_in_seconds: self.settings.default_expire_in_seconds,
                        tags: Vec::new(),
                    };
                    let id = self
                        .store
                        .insert(Table::ServiceRuntime, to_row(&runtime)?)
                        .await?;
                    created.push(id);
                }
                tracing::info!(
                    host_id = resource_id,
                    service = %identity,
                    entries = record.entries.len(),
                    "Deploy result stored"
                );
            }
        }
        Ok(created)
    }
}
