//! Runtime registry and discovery engine.
//!
//! [`Registry`] owns every persisted row. It answers discovery requests with a
//! load-balanced runtime, ingests host registrations, heartbeats and deploy
//! results, and runs the administrative host operations (address migration
//! and runtime teardown).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shoal_core::{MemoryStore, ServiceIdentity, StaticTokenValidator};
//! use shoal_registry::Registry;
//!
//! # async fn run() -> Result<(), shoal_registry::RegistryError> {
//! let validator = StaticTokenValidator::new().with_token("t", "acct-1", "owner");
//! let registry = Registry::new(Arc::new(MemoryStore::new()), Arc::new(validator));
//!
//! let identity = ServiceIdentity::new("shop", "cart", "add", None);
//! if let Some(found) = registry.fetch_service_runtime(&identity, "t").await? {
//!     println!("{} expires in {}s", found.identity, found.expire_in_seconds);
//! }
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod agent_rpc;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod target;

use std::sync::Arc;

use shoal_core::{AccountIdentity, RuntimeStore, TokenValidator};

pub use admin::{
    AddressUpdate, AddressUpdateReport, HostRemoval, RemovalFilter, RemovalOutcome, RemovalReport,
};
pub use agent_rpc::{AgentResponse, HostAgentClient};
pub use config::{LoadBalancingStrategy, RegistrySettings};
pub use discovery::{DiscoveryEntry, DiscoveryResult};
pub use error::RegistryError;
pub use ingest::HeartbeatAck;
pub use metrics::{LoggingMetricsBackend, MetricsBackend, RegistryMetrics};
pub use target::RuntimeTarget;

pub struct Registry {
    store: Arc<dyn RuntimeStore>,
    validator: Arc<dyn TokenValidator>,
    agents: Option<Arc<dyn HostAgentClient>>,
    settings: RegistrySettings,
    metrics: Arc<RegistryMetrics>,
}

impl Registry {
    pub fn new(store: Arc<dyn RuntimeStore>, validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            store,
            validator,
            agents: None,
            settings: RegistrySettings::default(),
            metrics: Arc::new(RegistryMetrics::new()),
        }
    }

    pub fn with_settings(mut self, settings: RegistrySettings) -> Self {
        self.settings = settings;
        self
    }

    /// Transport used to reach host agents during teardown. Without one,
    /// teardown always takes the store fallback.
    pub fn with_agent_client(mut self, agents: Arc<dyn HostAgentClient>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<RegistryMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub fn metrics(&self) -> &RegistryMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn RuntimeStore> {
        &self.store
    }

    async fn authenticate(&self, token: &str) -> Result<AccountIdentity, RegistryError> {
        Ok(self.validator.validate(token).await?)
    }

    /// Owner or designated administrator only.
    async fn authorize_admin(&self, token: &str) -> Result<AccountIdentity, RegistryError> {
        let identity = self.authenticate(token).await?;
        if !self.settings.is_admin(&identity.account_id) {
            tracing::warn!(account = %identity.account_id, "Rejected administrative call");
            return Err(RegistryError::Unauthorized(identity.account_id));
        }
        Ok(identity)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("settings", &self.settings)
            .field("has_agent_client", &self.agents.is_some())
            .finish()
    }
}
