use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use shoal_core::{DeployResult, EntryType, RuntimeEntry, RuntimeRecord, ServiceIdentity};

use crate::error::DeployError;
use crate::handler::{HandlerResolver, ServiceHandler};
use crate::metrics::DeployMetrics;
use crate::plan::{
    ApplicationDefinition, ApplicationServices, DeployPlan, ServiceDefinition, load_plan,
    services_by_application,
};
use crate::provider::{Provider, ProviderFactory};

/// A provider instantiated for the current run, with its plan definition.
struct LoadedProvider {
    name: String,
    instance: Arc<dyn Provider>,
    public: Option<Value>,
    raw: Value,
    definition_index: usize,
}

/// Realizes deploy plans as runtime records.
///
/// A run:
/// 1. instantiates every provider the plan names, in declaration order
/// 2. resolves each declared service's handler from the application's code
/// 3. registers every service on every provider
/// 4. runs each application's `init` sequence
///
/// The first failure aborts the run. Registrations made earlier in the same
/// run stay live; retrying the whole plan re-registers them.
pub struct Deployer {
    factory: ProviderFactory,
    handlers: Arc<dyn HandlerResolver>,
    base_dir: PathBuf,
    metrics: Arc<DeployMetrics>,
}

impl Deployer {
    pub fn new(factory: ProviderFactory, handlers: Arc<dyn HandlerResolver>) -> Self {
        Self {
            factory,
            handlers,
            base_dir: PathBuf::from("."),
            metrics: Arc::new(DeployMetrics::new()),
        }
    }

    /// Directory relative code locations resolve against.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<DeployMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &DeployMetrics {
        &self.metrics
    }

    pub fn factory(&self) -> &ProviderFactory {
        &self.factory
    }

    /// Deploy the plan stored at `plan_path`.
    ///
    /// Returns `Ok(None)` without side effects when the definitions are not a
    /// list or the plan has no application list.
    pub async fn deploy(
        &mut self,
        plan_path: &Path,
        service_definitions: &Value,
    ) -> Result<Option<DeployResult>, DeployError> {
        let plan = load_plan(plan_path).await?;
        if !service_definitions.is_array() || !plan.get("applications").is_some_and(Value::is_array)
        {
            tracing::warn!(plan = %plan_path.display(), "No service is set up to deploy");
            return Ok(None);
        }

        let plan: DeployPlan =
            serde_json::from_value(plan).map_err(|e| DeployError::InvalidPlan(e.to_string()))?;
        let definitions: Vec<ApplicationServices> =
            serde_json::from_value(service_definitions.clone())
                .map_err(|e| DeployError::InvalidDefinitions(e.to_string()))?;

        self.deploy_plan(&plan, &definitions).await.map(Some)
    }

    pub async fn deploy_plan(
        &mut self,
        plan: &DeployPlan,
        definitions: &[ApplicationServices],
    ) -> Result<DeployResult, DeployError> {
        self.metrics.record_run_started();
        match self.run(plan, definitions).await {
            Ok(result) => {
                self.metrics.record_run_completed();
                tracing::info!(applications = result.len(), "Deploy run completed");
                Ok(result)
            }
            Err(e) => {
                self.metrics.record_run_failed();
                tracing::error!(error = %e, "Deploy run aborted");
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        plan: &DeployPlan,
        definitions: &[ApplicationServices],
    ) -> Result<DeployResult, DeployError> {
        let providers = self.load_providers(plan)?;
        let services = services_by_application(definitions);

        let mut result = DeployResult::new();
        for app in &plan.applications {
            if app.name.is_empty() {
                continue;
            }
            let Some(app_services) = services.get(app.name.as_str()) else {
                tracing::debug!(application = %app.name, "No services declared, skipping");
                continue;
            };

            let records = result.entry(app.name.clone()).or_default();
            let Some(code_dir) = app.code_dir(&self.base_dir) else {
                tracing::warn!(application = %app.name, "Code location is not local, skipping");
                continue;
            };
            if !tokio::fs::try_exists(&code_dir).await.unwrap_or(false) {
                tracing::warn!(
                    application = %app.name,
                    path = %code_dir.display(),
                    "Code location does not exist, skipping"
                );
                continue;
            }

            for service in app_services {
                let handler = self.locate_handler(app, &code_dir, service).await?;
                let record = self
                    .register_everywhere(app, service, handler, plan, &providers)
                    .await?;
                records.push(record);
            }

            self.run_init(app, &code_dir, app_services).await?;
        }
        Ok(result)
    }

    fn load_providers(&mut self, plan: &DeployPlan) -> Result<Vec<LoadedProvider>, DeployError> {
        self.factory.clear_instances();
        let mut loaded: Vec<LoadedProvider> = Vec::with_capacity(plan.providers.len());
        for (index, definition) in plan.providers.iter().enumerate() {
            let Some(name) = definition.name() else {
                tracing::warn!(index, "Provider definition without a code name, skipping");
                continue;
            };
            let instance = self.factory.instantiate(name, &definition.provider_settings)?;
            let public = instance.info().or_else(|| definition.public_info().cloned());
            tracing::info!(provider = name, public = public.is_some(), "Provider loaded");
            let provider = LoadedProvider {
                name: name.to_string(),
                instance,
                public,
                raw: serde_json::to_value(definition)?,
                definition_index: index,
            };
            // Providers are keyed by name: a later definition replaces an
            // earlier one but keeps its position.
            match loaded.iter_mut().find(|p| p.name == name) {
                Some(earlier) => {
                    tracing::warn!(
                        provider = name,
                        index,
                        "Provider defined twice, using the later definition"
                    );
                    *earlier = provider;
                }
                None => loaded.push(provider),
            }
        }
        Ok(loaded)
    }

    async fn locate_handler(
        &self,
        app: &ApplicationDefinition,
        code_dir: &Path,
        service: &ServiceDefinition,
    ) -> Result<Arc<dyn ServiceHandler>, DeployError> {
        let Some(filepath) = service.filepath.as_deref().filter(|p| !p.is_empty()) else {
            return Err(DeployError::MissingFilePath {
                application: app.name.clone(),
                service: service.key(),
            });
        };
        let path = code_dir.join(filepath);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DeployError::MissingSourceFile {
                application: app.name.clone(),
                service: service.key(),
                path,
            });
        }
        self.handlers
            .resolve(&app.name, filepath, &service.name, &path)
            .ok_or_else(|| DeployError::MissingHandler {
                application: app.name.clone(),
                service: service.key(),
                path,
            })
    }

    async fn register_everywhere(
        &self,
        app: &ApplicationDefinition,
        service: &ServiceDefinition,
        handler: Arc<dyn ServiceHandler>,
        plan: &DeployPlan,
        providers: &[LoadedProvider],
    ) -> Result<RuntimeRecord, DeployError> {
        let mut entries = Vec::with_capacity(providers.len());
        for provider in providers {
            let settings = plan.providers[provider.definition_index].effective_settings(
                &app.name,
                &service.module,
                &service.name,
            );
            provider
                .instance
                .register_service(&app.name, service, Arc::clone(&handler), settings.as_ref())
                .await
                .map_err(|e| DeployError::Registration {
                    application: app.name.clone(),
                    service: service.key(),
                    provider: provider.name.clone(),
                    reason: e.to_string(),
                })?;
            self.metrics.record_registration();
            tracing::debug!(
                application = %app.name,
                service = %service.key(),
                provider = %provider.name,
                "Service registered on provider"
            );

            entries.push(match &provider.public {
                Some(info) => RuntimeEntry {
                    entry_type: EntryType::Dedicated,
                    provider_name: provider.name.clone(),
                    provider_info: Some(info.clone()),
                    provider_raw: Some(provider.raw.clone()),
                    settings_for_provider: settings,
                },
                None => RuntimeEntry {
                    entry_type: EntryType::Proxy,
                    provider_name: provider.name.clone(),
                    provider_info: None,
                    provider_raw: Some(provider.raw.clone()),
                    settings_for_provider: None,
                },
            });
        }

        if entries.is_empty() {
            return Err(DeployError::NoProviderAccepted {
                application: app.name.clone(),
                service: service.key(),
            });
        }

        Ok(RuntimeRecord {
            identity: ServiceIdentity::new(
                app.name.clone(),
                service.module.clone(),
                service.name.clone(),
                app.version.clone(),
            ),
            source: service.filepath.clone(),
            arguments: service.arguments.clone(),
            return_type: service.return_type.clone(),
            entries,
        })
    }

    /// Run the application's init entries in order, each to completion.
    async fn run_init(
        &self,
        app: &ApplicationDefinition,
        code_dir: &Path,
        services: &[&ServiceDefinition],
    ) -> Result<(), DeployError> {
        for step in &app.init {
            let Some(service) = services.iter().find(|s| s.key() == step.service) else {
                return Err(DeployError::UnknownInitService {
                    application: app.name.clone(),
                    service: step.service.clone(),
                });
            };
            let handler = self.locate_handler(app, code_dir, service).await?;
            handler
                .call(step.arguments.clone())
                .await
                .map_err(|e| DeployError::InitFailed {
                    application: app.name.clone(),
                    service: step.service.clone(),
                    reason: e.to_string(),
                })?;
            tracing::info!(application = %app.name, service = %step.service, "Init step completed");
        }
        Ok(())
    }
}
