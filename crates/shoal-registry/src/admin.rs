//! Administrative host operations: runtime teardown and address migration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::store::{Row, from_row};
use shoal_core::{
    CONTROL_PLANE_APPLICATION, Filter, HostAddress, HostRef, HostRefError, Query, Resource,
    ResourceType, Table, WILDCARD,
};

use crate::Registry;
use crate::agent_rpc::REMOVE_SERVICES;
use crate::error::RegistryError;

/// Which runtimes to tear down. Empty lists, or lists containing `*`, do not
/// constrain their field.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalFilter {
    /// `account@hostname` or resource ids. Empty means "every host running a
    /// matching runtime".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub versions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn constraint(values: &[String]) -> Option<&[String]> {
    (!values.is_empty() && !values.iter().any(|v| v == WILDCARD)).then_some(values)
}

impl RemovalFilter {
    /// Conditions shared by host derivation and the store fallback.
    fn field_filter(&self, mut filter: Filter) -> Filter {
        for (field, values) in [
            ("module", &self.modules),
            ("name", &self.services),
            ("version", &self.versions),
            ("tags", &self.tags),
        ] {
            if let Some(values) = constraint(values) {
                filter = filter.any_of(field, values.iter().map(String::as_str));
            }
        }
        filter
    }

    fn agent_payload(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(RemovalFilter {
            hosts: Vec::new(),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RemovalOutcome {
    /// The agent stopped the services and named the rows it removed.
    AgentConfirmed { removed: u64 },
    /// The agent could not be used; rows were deleted from the store directly.
    StoreFallback { removed: u64, reason: String },
    /// The host reference did not resolve to a resource.
    HostNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRemoval {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    #[serde(flatten)]
    pub outcome: RemovalOutcome,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalReport {
    pub hosts: Vec<HostRemoval>,
}

impl RemovalReport {
    pub fn removed(&self) -> u64 {
        self.hosts
            .iter()
            .map(|h| match h.outcome {
                RemovalOutcome::AgentConfirmed { removed }
                | RemovalOutcome::StoreFallback { removed, .. } => removed,
                RemovalOutcome::HostNotFound => 0,
            })
            .sum()
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressUpdate {
    /// `account@hostname` or a resource id.
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressUpdateReport {
    pub hosts: u64,
    pub service_runtimes: u64,
}

/// Point a provider descriptor at the host's new address.
///
/// The connection host lives in `providerSettings.public.host` when the
/// provider is public, otherwise in the descriptor's own `host`. It changes
/// only when it equals a previous address whose family received a new value.
fn rewrite_provider(descriptor: &mut Value, previous: &HostAddress, next: &HostAddress) -> bool {
    let public = descriptor
        .pointer("/providerSettings/public")
        .is_some_and(Value::is_object);
    let info = if public {
        descriptor.pointer_mut("/providerSettings/public")
    } else {
        Some(descriptor)
    };
    let Some(info) = info.and_then(Value::as_object_mut) else {
        return false;
    };
    let Some(current) = info.get("host").and_then(Value::as_str) else {
        return false;
    };

    let replacement = if previous.ipv4.as_deref() == Some(current) {
        next.ipv4.as_ref()
    } else if previous.ipv6.as_deref() == Some(current) {
        next.ipv6.as_ref()
    } else {
        None
    };
    match replacement {
        Some(new_host) if new_host != current => {
            info.insert("host".into(), Value::String(new_host.clone()));
            true
        }
        _ => false,
    }
}

/// Apply [`rewrite_provider`] to a single descriptor or each one in a list.
fn rewrite_providers(providers: &mut Value, previous: &HostAddress, next: &HostAddress) -> bool {
    match providers {
        Value::Array(list) => list
            .iter_mut()
            .fold(false, |changed, p| rewrite_provider(p, previous, next) | changed),
        Value::Null => false,
        single => rewrite_provider(single, previous, next),
    }
}

impl Registry {
    /// Tear down runtimes matching `filter`, host by host.
    ///
    /// Each host's agent is asked first. When it is unreachable, reports an
    /// error or confirms nothing, matching rows are deleted from the store
    /// directly. Wildcard application filters never remove control-plane
    /// runtimes; those must be named explicitly.
    pub async fn remove_service_runtime(
        &self,
        filter: &RemovalFilter,
        token: &str,
    ) -> Result<RemovalReport, RegistryError> {
        let caller = self.authorize_admin(token).await?;
        tracing::info!(account = %caller.account_id, ?filter, "Removing service runtimes");

        let mut report = RemovalReport::default();
        if constraint(&filter.hosts).is_none() {
            for host_id in self.hosts_running(filter).await? {
                let outcome = self.remove_on_host(&host_id, filter).await?;
                report.hosts.push(HostRemoval {
                    host: host_id.clone(),
                    host_id: Some(host_id),
                    outcome,
                });
            }
            return Ok(report);
        }

        for host in &filter.hosts {
            let Some(host_id) = self.resolve_host_id(&HostRef::parse(host)?).await? else {
                tracing::warn!(host = %host, "Host not found, skipping");
                report.hosts.push(HostRemoval {
                    host: host.clone(),
                    host_id: None,
                    outcome: RemovalOutcome::HostNotFound,
                });
                continue;
            };
            let outcome = self.remove_on_host(&host_id, filter).await?;
            report.hosts.push(HostRemoval {
                host: host.clone(),
                host_id: Some(host_id),
                outcome,
            });
        }
        Ok(report)
    }

    /// Move a host to a new address and repoint every provider descriptor
    /// that referenced the old one.
    pub async fn update_host_ip_address(
        &self,
        update: &AddressUpdate,
        token: &str,
    ) -> Result<AddressUpdateReport, RegistryError> {
        self.authorize_admin(token).await?;

        let host_ref = HostRef::parse(&update.host)?;
        let supplied = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if !supplied(&update.ipv4) && !supplied(&update.ipv6) {
            return Err(RegistryError::MissingAddress(update.host.clone()));
        }

        let Some(mut host) = self.find_resource(&host_ref, None).await? else {
            return Err(RegistryError::HostNotFound(update.host.clone()));
        };
        let Some(host_id) = host.id.clone() else {
            return Err(RegistryError::HostNotFound(update.host.clone()));
        };

        let previous = host
            .address
            .as_deref()
            .and_then(HostAddress::parse)
            .unwrap_or_default();
        let mut next = previous.clone();
        if supplied(&update.ipv4) {
            next.ipv4 = update.ipv4.clone();
        }
        if supplied(&update.ipv6) {
            next.ipv6 = update.ipv6.clone();
        }

        rewrite_providers(&mut host.providers, &previous, &next);

        let mut patch = Row::new();
        patch.insert("address".into(), Value::from(next.to_composite()));
        patch.insert("providers".into(), host.providers);
        self.store
            .set(Table::Resource, Some(patch), &Filter::new().eq("id", host_id.as_str()))
            .await?;

        let runtimes = self
            .store
            .get(
                Table::ServiceRuntime,
                &Query::new(Filter::new().eq("resource_id", host_id.as_str())),
            )
            .await?;

        let mut changed_rows = 0;
        for mut row in runtimes {
            let mut changed = false;
            for key in ["provider_raw", "provider_info"] {
                if let Some(descriptor) = row.get_mut(key) {
                    changed |= rewrite_provider(descriptor, &previous, &next);
                }
            }
            if !changed {
                continue;
            }
            let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let mut patch = Row::new();
            for key in ["provider_raw", "provider_info"] {
                if let Some(value) = row.remove(key) {
                    patch.insert(key.into(), value);
                }
            }
            self.store
                .set(Table::ServiceRuntime, Some(patch), &Filter::new().eq("id", id))
                .await?;
            changed_rows += 1;
        }

        tracing::info!(
            host_id = %host_id,
            address = %next.to_composite(),
            service_runtimes = changed_rows,
            "Host address updated"
        );
        Ok(AddressUpdateReport {
            hosts: 1,
            service_runtimes: changed_rows,
        })
    }

    /// Distinct hosts running a runtime that matches the filter.
    async fn hosts_running(&self, filter: &RemovalFilter) -> Result<Vec<String>, RegistryError> {
        let mut query_filter = filter.field_filter(Filter::new());
        if let Some(apps) = constraint(&filter.applications) {
            query_filter = query_filter.any_of("application", apps.iter().map(String::as_str));
        }
        let rows = self
            .store
            .get(
                Table::ServiceRuntime,
                &Query::new(query_filter).project(["resource_id"]),
            )
            .await?;
        let hosts: BTreeSet<String> = rows
            .iter()
            .filter_map(|r| r.get("resource_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(hosts.into_iter().collect())
    }

    /// Resource lookup by reference. `account@hostname` may be narrowed to a
    /// resource type; more than one match is ambiguous.
    async fn find_resource(
        &self,
        host_ref: &HostRef,
        resource_type: Option<ResourceType>,
    ) -> Result<Option<Resource>, RegistryError> {
        let filter = match host_ref {
            HostRef::Id(id) => Filter::new().eq("id", id.as_str()),
            HostRef::Named { account, name } => {
                let filter = Filter::new()
                    .eq("account", account.as_str())
                    .eq("name", name.as_str());
                match resource_type {
                    Some(t) => filter.eq("type", t.as_str()),
                    None => filter,
                }
            }
        };
        let mut rows = self
            .store
            .get(Table::Resource, &Query::new(filter).limit(2))
            .await?;
        if rows.len() > 1 {
            return Err(HostRefError::Ambiguous {
                host: host_ref.to_string(),
                matches: rows.len(),
            }
            .into());
        }
        match rows.pop() {
            Some(row) => Ok(Some(from_row(Table::Resource, row)?)),
            None => Ok(None),
        }
    }

    async fn resolve_host_id(&self, host_ref: &HostRef) -> Result<Option<String>, RegistryError> {
        match host_ref {
            HostRef::Id(id) => Ok(Some(id.clone())),
            named => Ok(self
                .find_resource(named, Some(ResourceType::Host))
                .await?
                .and_then(|r| r.id)),
        }
    }

    async fn remove_on_host(
        &self,
        host_id: &str,
        filter: &RemovalFilter,
    ) -> Result<RemovalOutcome, RegistryError> {
        let reason = match self.ask_agent(host_id, filter).await {
            Ok(ids) => {
                let removed = self
                    .store
                    .set(
                        Table::ServiceRuntime,
                        None,
                        &Filter::new()
                            .eq("resource_id", host_id)
                            .any_of("id", ids.iter().map(String::as_str)),
                    )
                    .await?;
                tracing::info!(host_id, removed, "Agent confirmed runtime removal");
                self.metrics.record_agent_confirmed_removal();
                return Ok(RemovalOutcome::AgentConfirmed { removed });
            }
            Err(reason) => reason,
        };

        tracing::warn!(host_id, %reason, "Agent removal failed, deleting runtimes from store");
        self.metrics.record_store_fallback();
        let removed = self.remove_from_store(host_id, filter).await?;
        Ok(RemovalOutcome::StoreFallback { removed, reason })
    }

    /// Ids the agent reports as removed, or why the agent cannot be relied on.
    async fn ask_agent(
        &self,
        host_id: &str,
        filter: &RemovalFilter,
    ) -> Result<Vec<String>, String> {
        let Some(agents) = &self.agents else {
            return Err("no agent transport configured".into());
        };
        let payload = filter.agent_payload().map_err(|e| e.to_string())?;
        let response = agents
            .invoke(host_id, REMOVE_SERVICES, payload)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(error) = response.error {
            return Err(format!("agent reported: {error}"));
        }
        match response.res {
            Some(ids) if !ids.is_empty() => Ok(ids),
            _ => Err("empty response from agent".into()),
        }
    }

    async fn remove_from_store(
        &self,
        host_id: &str,
        filter: &RemovalFilter,
    ) -> Result<u64, RegistryError> {
        let applications: Vec<String> = match constraint(&filter.applications) {
            Some(explicit) => explicit.to_vec(),
            None => {
                // Expand the wildcard to what the host runs, minus the control plane.
                let rows = self
                    .store
                    .get(
                        Table::ServiceRuntime,
                        &Query::new(Filter::new().eq("resource_id", host_id))
                            .project(["application"]),
                    )
                    .await?;
                let apps: BTreeSet<String> = rows
                    .iter()
                    .filter_map(|r| r.get("application").and_then(Value::as_str))
                    .filter(|app| *app != CONTROL_PLANE_APPLICATION)
                    .map(str::to_string)
                    .collect();
                apps.into_iter().collect()
            }
        };
        if applications.is_empty() {
            tracing::debug!(host_id, "Nothing removable on host");
            return Ok(0);
        }

        let query = filter.field_filter(
            Filter::new()
                .eq("resource_id", host_id)
                .any_of("application", applications.iter().map(String::as_str)),
        );
        Ok(self.store.set(Table::ServiceRuntime, None, &query).await?)
    }
}
