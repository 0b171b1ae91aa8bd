use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shoal_core::{DeployResult, Filter, HostAddress, LoadSample, Resource, RuntimeStore, Table};
use shoal_registry::{AgentResponse, HostAgentClient, Registry, RegistryError};

use crate::error::AgentError;

pub const UPDATE_RESOURCE_INFO: &str = "updateResourceInfo";
pub const RESOURCE_HEARTBEAT: &str = "resourceHeartbeat";
pub const UPLOAD_SERVICE_DEPLOY_RESULT: &str = "uploadServiceDeployResult";

/// The registry calls a host agent makes.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait RegistryClient: Send + Sync {
    /// Register or refresh the host. `Ok(None)` means the registry answered
    /// without assigning an id.
    fn update_resource_info<'a>(
        &'a self,
        resource: &'a Resource,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AgentError>> + Send + 'a>>;

    fn resource_heartbeat<'a>(
        &'a self,
        sample: &'a LoadSample,
    ) -> Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + 'a>>;

    /// Persist a deploy run for host `resource_id`. Returns the ids of the
    /// runtime rows created, one per runtime entry in result order.
    fn upload_service_deploy_result<'a>(
        &'a self,
        result: &'a DeployResult,
        resource_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, AgentError>> + Send + 'a>>;
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadRequest<'a> {
    resource_id: &'a str,
    deploy_result: &'a DeployResult,
}

#[derive(Debug, Deserialize)]
struct IdsResponse {
    #[serde(default)]
    ids: Vec<String>,
}

/// Talks to a registry over HTTP. Each call is a `POST {base_url}/{method}`
/// with a JSON body.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRegistryClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn post(
        &self,
        method: &str,
        body: &impl serde::Serialize,
    ) -> Result<reqwest::Response, AgentError> {
        let url = format!("{}/{method}", self.base_url);
        let mut req = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("{method}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Rejected { status, body });
        }
        Ok(resp)
    }
}

impl RegistryClient for HttpRegistryClient {
    fn update_resource_info<'a>(
        &'a self,
        resource: &'a Resource,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self.post(UPDATE_RESOURCE_INFO, resource).await?;
            let body: IdResponse = resp
                .json()
                .await
                .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
            Ok(body.id.filter(|id| !id.is_empty()))
        })
    }

    fn resource_heartbeat<'a>(
        &'a self,
        sample: &'a LoadSample,
    ) -> Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + 'a>> {
        Box::pin(async move {
            self.post(RESOURCE_HEARTBEAT, sample).await?;
            Ok(())
        })
    }

    fn upload_service_deploy_result<'a>(
        &'a self,
        result: &'a DeployResult,
        resource_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            let request = UploadRequest {
                resource_id,
                deploy_result: result,
            };
            let resp = self.post(UPLOAD_SERVICE_DEPLOY_RESULT, &request).await?;
            let body: IdsResponse = resp
                .json()
                .await
                .map_err(|e| AgentError::InvalidResponse(e.to_string()))?;
            Ok(body.ids)
        })
    }
}

/// Calls a registry living in the same process.
pub struct LocalRegistryClient {
    registry: Arc<Registry>,
    token: String,
}

impl LocalRegistryClient {
    pub fn new(registry: Arc<Registry>, token: impl Into<String>) -> Self {
        Self {
            registry,
            token: token.into(),
        }
    }
}

impl RegistryClient for LocalRegistryClient {
    fn update_resource_info<'a>(
        &'a self,
        resource: &'a Resource,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            let id = self
                .registry
                .update_resource_info(resource, &self.token)
                .await?;
            Ok(Some(id))
        })
    }

    fn resource_heartbeat<'a>(
        &'a self,
        sample: &'a LoadSample,
    ) -> Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + 'a>> {
        Box::pin(async move {
            self.registry.resource_heartbeat(sample, &self.token).await?;
            Ok(())
        })
    }

    fn upload_service_deploy_result<'a>(
        &'a self,
        result: &'a DeployResult,
        resource_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, AgentError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .registry
                .upload_service_deploy_result(result, resource_id, &self.token)
                .await?)
        })
    }
}

/// Registry-side transport to host agents over HTTP.
///
/// A call to host `h` is `POST http://{address of h}:{port}/{method}` with the
/// payload as JSON body. The address comes from the host's resource row,
/// ipv4 first.
pub struct HttpHostAgentClient {
    http: reqwest::Client,
    store: Arc<dyn RuntimeStore>,
    port: u16,
    token: Option<String>,
}

impl HttpHostAgentClient {
    pub fn new(store: Arc<dyn RuntimeStore>, port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            port,
            token: None,
        }
    }

    /// Bearer token presented to agents.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    async fn agent_url(&self, host_id: &str) -> Result<String, RegistryError> {
        let Some(row) = self
            .store
            .get_one(Table::Resource, Filter::new().eq("id", host_id))
            .await?
        else {
            return Err(RegistryError::HostNotFound(host_id.to_string()));
        };
        let address = row
            .get("address")
            .and_then(Value::as_str)
            .and_then(HostAddress::parse)
            .unwrap_or_default();
        let host = match (address.ipv4, address.ipv6) {
            (Some(ipv4), _) => ipv4,
            (None, Some(ipv6)) => format!("[{ipv6}]"),
            (None, None) => return Err(RegistryError::MissingAddress(host_id.to_string())),
        };
        Ok(format!("http://{host}:{}", self.port))
    }
}

impl HostAgentClient for HttpHostAgentClient {
    fn invoke<'a>(
        &'a self,
        host_id: &'a str,
        method: &'a str,
        payload: Value,
    ) -> Pin<Box<dyn Future<Output = Result<AgentResponse, RegistryError>> + Send + 'a>> {
        Box::pin(async move {
            let failed = |reason: String| RegistryError::Agent {
                host_id: host_id.to_string(),
                reason,
            };
            let url = format!("{}/{method}", self.agent_url(host_id).await?);
            let mut req = self.http.post(&url).json(&payload);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            let resp = req.send().await.map_err(|e| failed(e.to_string()))?;
            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                return Err(failed(format!("{method} returned {status}: {body}")));
            }
            tracing::debug!(host_id, method, "Agent answered");
            resp.json()
                .await
                .map_err(|e| failed(format!("invalid response: {e}")))
        })
    }
}
