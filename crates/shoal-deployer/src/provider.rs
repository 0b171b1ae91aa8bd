use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{DeployError, HandlerError, ProviderError};
use crate::handler::ServiceHandler;
use crate::plan::ServiceDefinition;

/// An execution environment services are registered on.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait Provider: Send + Sync {
    fn register_service<'a>(
        &'a self,
        application: &'a str,
        service: &'a ServiceDefinition,
        handler: Arc<dyn ServiceHandler>,
        settings: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>>;

    /// Stop serving `module/name` of `application`. Returns whether the
    /// provider was serving it. Providers without teardown keep serving.
    fn unregister_service<'a>(
        &'a self,
        application: &'a str,
        service_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ProviderError>> + Send + 'a>> {
        let _ = (application, service_key);
        Box::pin(async { Ok(false) })
    }

    /// Public connection info, when clients can reach the provider directly.
    fn info(&self) -> Option<Value> {
        None
    }
}

pub type ProviderConstructor =
    Box<dyn Fn(&Value) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync>;

/// Provider implementations by name, and the instances created from them.
#[derive(Default)]
pub struct ProviderFactory {
    constructors: HashMap<String, ProviderConstructor>,
    instances: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory that knows the in-process [`LocalProvider`] as `local`.
    pub fn with_defaults() -> Self {
        Self::new().with_provider(LOCAL_PROVIDER, |settings| {
            Ok(Arc::new(LocalProvider::new(settings.get("public").cloned())) as Arc<dyn Provider>)
        })
    }

    pub fn with_provider<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn Provider>, ProviderError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Box::new(constructor));
        self
    }

    pub fn knows(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Build a fresh instance and cache it under `name`.
    pub fn instantiate(
        &mut self,
        name: &str,
        settings: &Value,
    ) -> Result<Arc<dyn Provider>, DeployError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| DeployError::UnknownProvider(name.to_string()))?;
        let instance =
            constructor(settings).map_err(|e| DeployError::ProviderInstantiation {
                provider: name.to_string(),
                reason: e.to_string(),
            })?;
        self.instances.insert(name.to_string(), Arc::clone(&instance));
        tracing::debug!(provider = name, "Provider instantiated");
        Ok(instance)
    }

    pub fn instance(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.instances.get(name).cloned()
    }

    /// Drop every cached instance. Constructors stay registered.
    pub fn clear_instances(&mut self) {
        self.instances.clear();
    }
}

pub const LOCAL_PROVIDER: &str = "local";

/// Provider that keeps handlers in memory and invokes them in-process.
pub struct LocalProvider {
    public: Option<Value>,
    services: RwLock<HashMap<(String, String), (Arc<dyn ServiceHandler>, Option<Value>)>>,
}

impl LocalProvider {
    pub fn new(public: Option<Value>) -> Self {
        Self {
            public: public.filter(|v| !v.is_null()),
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Call a registered service by application and `module/name` key.
    pub async fn invoke(
        &self,
        application: &str,
        service_key: &str,
        args: Vec<Value>,
    ) -> Result<Value, HandlerError> {
        let handler = self
            .services
            .read()
            .await
            .get(&(application.to_string(), service_key.to_string()))
            .map(|(h, _)| Arc::clone(h))
            .ok_or_else(|| {
                HandlerError(format!("service {application}:{service_key} is not registered"))
            })?;
        handler.call(args).await
    }

    pub async fn settings_for(&self, application: &str, service_key: &str) -> Option<Value> {
        self.services
            .read()
            .await
            .get(&(application.to_string(), service_key.to_string()))
            .and_then(|(_, s)| s.clone())
    }
}

impl Provider for LocalProvider {
    fn register_service<'a>(
        &'a self,
        application: &'a str,
        service: &'a ServiceDefinition,
        handler: Arc<dyn ServiceHandler>,
        settings: Option<&'a Value>,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            self.services.write().await.insert(
                (application.to_string(), service.key()),
                (handler, settings.cloned()),
            );
            Ok(())
        })
    }

    fn unregister_service<'a>(
        &'a self,
        application: &'a str,
        service_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ProviderError>> + Send + 'a>> {
        Box::pin(async move {
            let removed = self
                .services
                .write()
                .await
                .remove(&(application.to_string(), service_key.to_string()));
            Ok(removed.is_some())
        })
    }

    fn info(&self) -> Option<Value> {
        self.public.clone()
    }
}
