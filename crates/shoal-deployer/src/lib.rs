//! Deployment orchestrator: binds the services of a deploy plan to every
//! provider the plan names and reports one runtime record per service.

pub mod error;
pub mod handler;
pub mod metrics;
pub mod orchestrator;
pub mod plan;
pub mod provider;

pub use error::{DeployError, HandlerError, ProviderError};
pub use handler::{
    CommandHandlerResolver, HandlerRegistry, HandlerResolver, ServiceHandler, handler_fn,
};
pub use metrics::{DeployMetrics, DeploySnapshot};
pub use orchestrator::Deployer;
pub use plan::{
    ApplicationDefinition, ApplicationServices, DeployPlan, InitEntry, PlanSummary,
    ProviderDefinition, ServiceDefinition,
};
pub use provider::{LOCAL_PROVIDER, LocalProvider, Provider, ProviderFactory};
