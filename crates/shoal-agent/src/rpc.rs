//! Calls a registry makes on the host agent, and the HTTP endpoint serving
//! them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use shoal_core::{CONTROL_PLANE_APPLICATION, DeployResult, WILDCARD};
use shoal_deployer::Provider;
use shoal_registry::agent_rpc::REMOVE_SERVICES;
use shoal_registry::{AgentResponse, RemovalFilter};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

/// One provider entry of a service deployed on this host, under the id the
/// registry gave its runtime row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedRuntime {
    pub id: String,
    pub application: String,
    pub module: String,
    pub name: String,
    /// `*` when the deploy did not pin a version.
    pub version: String,
    pub provider_name: String,
}

impl HostedRuntime {
    /// `module/name`, as providers key services.
    pub fn service_key(&self) -> String {
        format!("{}/{}", self.module, self.name)
    }
}

/// Runtimes deployed on this host.
#[derive(Debug, Default)]
pub struct HostedRuntimes {
    runtimes: RwLock<Vec<HostedRuntime>>,
}

impl HostedRuntimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an uploaded deploy result. `ids` are the registry's row ids,
    /// one per runtime entry in result order. A service recorded again
    /// replaces its earlier runtimes, as the registry does on re-upload.
    /// Returns how many runtimes were recorded.
    pub async fn record(&self, result: &DeployResult, ids: &[String]) -> usize {
        let mut ids = ids.iter();
        let mut runtimes = self.runtimes.write().await;
        let mut recorded = 0;
        for (application, records) in result {
            for record in records {
                let identity = &record.identity;
                let application = if identity.application.is_empty() {
                    application.as_str()
                } else {
                    identity.application.as_str()
                };
                runtimes.retain(|r| {
                    !(r.application == application
                        && r.module == identity.module
                        && r.name == identity.name)
                });
                let version = identity.pinned_version().unwrap_or(WILDCARD);
                for entry in &record.entries {
                    let Some(id) = ids.next() else {
                        tracing::warn!(recorded, "Fewer runtime ids than entries, stopping");
                        return recorded;
                    };
                    runtimes.push(HostedRuntime {
                        id: id.clone(),
                        application: application.to_string(),
                        module: identity.module.clone(),
                        name: identity.name.clone(),
                        version: version.to_string(),
                        provider_name: entry.provider_name.clone(),
                    });
                    recorded += 1;
                }
            }
        }
        recorded
    }

    pub async fn len(&self) -> usize {
        self.runtimes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runtimes.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.runtimes
            .read()
            .await
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// Remove and return every runtime the filter selects.
    async fn take_matching(&self, filter: &RemovalFilter) -> Vec<HostedRuntime> {
        let mut runtimes = self.runtimes.write().await;
        let (taken, kept): (Vec<_>, Vec<_>) =
            runtimes.drain(..).partition(|r| selects(filter, r));
        *runtimes = kept;
        taken
    }
}

/// Empty lists and lists containing `*` select everything.
fn allows(values: &[String], value: &str) -> bool {
    values.is_empty() || values.iter().any(|v| v == WILDCARD || v == value)
}

fn selects(filter: &RemovalFilter, runtime: &HostedRuntime) -> bool {
    let application = if runtime.application == CONTROL_PLANE_APPLICATION {
        filter.applications.iter().any(|a| *a == runtime.application)
    } else {
        allows(&filter.applications, &runtime.application)
    };
    // Hosted runtimes carry no tags, so a tag constraint selects none.
    application
        && allows(&filter.modules, &runtime.module)
        && allows(&filter.services, &runtime.name)
        && allows(&filter.versions, &runtime.version)
        && (filter.tags.is_empty() || filter.tags.iter().any(|t| t == WILDCARD))
}

/// Dispatches registry calls against this host's runtimes.
pub struct AgentRpc {
    runtimes: Arc<HostedRuntimes>,
    providers: HashMap<String, Arc<dyn Provider>>,
    token: Option<String>,
}

impl AgentRpc {
    pub fn new(runtimes: Arc<HostedRuntimes>) -> Self {
        Self {
            runtimes,
            providers: HashMap::new(),
            token: None,
        }
    }

    /// Provider instance removed services are unregistered from.
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(name.into(), provider);
        self
    }

    /// Require `Authorization: Bearer {token}` on HTTP calls.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn runtimes(&self) -> &Arc<HostedRuntimes> {
        &self.runtimes
    }

    pub async fn handle(&self, method: &str, payload: Value) -> AgentResponse {
        match method {
            REMOVE_SERVICES => match serde_json::from_value::<RemovalFilter>(payload) {
                Ok(filter) => self.remove_services(&filter).await,
                Err(e) => {
                    AgentResponse::failed(format!("invalid {REMOVE_SERVICES} payload: {e}"))
                }
            },
            other => AgentResponse::failed(format!("unknown method {other}")),
        }
    }

    async fn remove_services(&self, filter: &RemovalFilter) -> AgentResponse {
        let removed = self.runtimes.take_matching(filter).await;
        for runtime in &removed {
            let Some(provider) = self.providers.get(&runtime.provider_name) else {
                continue;
            };
            let key = runtime.service_key();
            if let Err(e) = provider.unregister_service(&runtime.application, &key).await {
                tracing::warn!(
                    application = %runtime.application,
                    service = %key,
                    provider = %runtime.provider_name,
                    error = %e,
                    "Provider failed to unregister service"
                );
            }
        }
        tracing::info!(removed = removed.len(), "Services removed on registry request");
        AgentResponse::removed(removed.into_iter().map(|r| r.id).collect())
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == token)
    }
}

async fn invoke(
    State(rpc): State<Arc<AgentRpc>>,
    Path(method): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    if !rpc.authorized(&headers) {
        tracing::warn!(method = %method, "Rejected agent call with a bad token");
        return (StatusCode::UNAUTHORIZED, "invalid agent token").into_response();
    }
    Json(rpc.handle(&method, payload).await).into_response()
}

/// `POST /{method}` with a JSON payload, answered with an [`AgentResponse`].
pub fn router(rpc: Arc<AgentRpc>) -> Router {
    Router::new()
        .route("/:method", post(invoke))
        .with_state(rpc)
}

/// Serve the agent RPC on `listener` until `shutdown` resolves.
pub async fn serve_agent_rpc(
    listener: TcpListener,
    rpc: Arc<AgentRpc>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Agent RPC listening");
    }
    axum::serve(listener, router(rpc))
        .with_graceful_shutdown(shutdown)
        .await
}
