use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::store::{Row, from_row, to_row};
use shoal_core::{
    EntryType, Filter, Order, Query, Service, ServiceArgument, ServiceIdentity, ServiceRuntime,
    Table,
};

use crate::Registry;
use crate::config::LoadBalancingStrategy;
use crate::error::RegistryError;
use crate::target::RuntimeTarget;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEntry {
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_for_provider: Option<Value>,
}

/// A resolved runtime, ready to be cached by the caller for
/// `expire_in_seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub identity: ServiceIdentity,
    pub entries: Vec<DiscoveryEntry>,
    pub expire_in_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<ServiceArgument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl Registry {
    /// Resolve one identity to a live runtime.
    ///
    /// Returns `Ok(None)` when the service or an admissible runtime is missing;
    /// fails only on an invalid token or an incomplete identity.
    pub async fn fetch_service_runtime(
        &self,
        identity: &ServiceIdentity,
        token: &str,
    ) -> Result<Option<DiscoveryResult>, RegistryError> {
        self.authenticate(token).await?;
        self.resolve_runtime(identity).await
    }

    /// Resolve each identity independently, keeping only the ones that
    /// resolved. The token is checked once for the whole batch.
    pub async fn fetch_service_runtimes(
        &self,
        identities: &[ServiceIdentity],
        token: &str,
    ) -> Result<Vec<DiscoveryResult>, RegistryError> {
        self.authenticate(token).await?;

        let mut resolved = Vec::with_capacity(identities.len());
        for identity in identities {
            match self.resolve_runtime(identity).await {
                Ok(Some(result)) => resolved.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        service = %identity,
                        error = %e,
                        "Skipping identity in batch lookup"
                    );
                }
            }
        }
        Ok(resolved)
    }

    /// The only load-balancing decision point. Pure read: the chosen row's
    /// capacity is not reserved.
    pub async fn find_available_runtime(
        &self,
        target: &RuntimeTarget,
        strategy: Option<LoadBalancingStrategy>,
    ) -> Result<Option<Row>, RegistryError> {
        let order = match strategy.unwrap_or(self.settings.strategy) {
            LoadBalancingStrategy::EvenWorkload => Order::Ascending,
            LoadBalancingStrategy::WorkloadFocusing => Order::Descending,
        };
        let query = Query::new(target.admission_filter(self.settings.workload_threshold))
            .order_by("workload_percentage", order)
            .limit(1);
        Ok(self.store.get(target.table(), &query).await?.into_iter().next())
    }

    async fn resolve_runtime(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Option<DiscoveryResult>, RegistryError> {
        if !identity.is_complete() {
            return Err(RegistryError::InvalidIdentity(identity.to_string()));
        }

        let (target, service) = if identity.is_control_plane() {
            (RuntimeTarget::ServiceIdentity(identity.clone()), None)
        } else {
            let service = self.find_service(identity).await?;
            let service_id = service
                .as_ref()
                .and_then(|s| s.id.clone())
                .filter(|id| !id.is_empty());
            match service_id {
                Some(service_id) => (RuntimeTarget::Service { service_id }, service),
                None => {
                    tracing::debug!(service = %identity, "No registered service");
                    self.metrics.record_discovery_missed();
                    return Ok(None);
                }
            }
        };

        let Some(row) = self.find_available_runtime(&target, None).await? else {
            tracing::debug!(service = %identity, "No admissible runtime");
            self.metrics.record_discovery_missed();
            return Ok(None);
        };
        let runtime: ServiceRuntime = from_row(Table::ServiceRuntime, row)?;

        if let Some(id) = service.as_ref().and_then(|s| s.id.as_deref()) {
            self.touch_service(id).await?;
        }

        tracing::debug!(
            service = %identity,
            resource_id = %runtime.resource_id,
            workload = runtime.workload_percentage,
            "Runtime resolved"
        );
        self.metrics.record_discovery_resolved();

        Ok(Some(DiscoveryResult {
            identity: ServiceIdentity::new(
                identity.application.clone(),
                identity.module.clone(),
                identity.name.clone(),
                Some(runtime.version),
            ),
            entries: vec![DiscoveryEntry {
                entry_type: runtime.entry_type,
                provider_info: runtime.provider_info,
                settings_for_provider: runtime.settings_for_provider,
            }],
            expire_in_seconds: runtime.expire_in_seconds,
            arguments: service.as_ref().map(|s| s.arguments.clone()),
            return_type: service.and_then(|s| s.return_type),
        }))
    }

    /// Latest registered service matching the identity, without side effects.
    pub(crate) async fn find_service(
        &self,
        identity: &ServiceIdentity,
    ) -> Result<Option<Service>, RegistryError> {
        let mut filter = Filter::new()
            .eq("application", identity.application.as_str())
            .eq("module", identity.module.as_str())
            .eq("name", identity.name.as_str());
        if let Some(version) = identity.pinned_version() {
            filter = filter.eq("version", version);
        }
        let query = Query::new(filter)
            .order_by("create_on", Order::Descending)
            .limit(1);
        match self.store.get(Table::Service, &query).await?.into_iter().next() {
            Some(row) => Ok(Some(from_row(Table::Service, row)?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn touch_service(&self, service_id: &str) -> Result<(), RegistryError> {
        let patch = to_row(&serde_json::json!({ "last_access_on": chrono::Utc::now() }))?;
        self.store
            .set(
                Table::Service,
                Some(patch),
                &Filter::new().eq("id", service_id),
            )
            .await?;
        Ok(())
    }
}
