use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RegistryError;

/// Method name the registry invokes on a host agent to tear down services.
pub const REMOVE_SERVICES: &str = "removeServices";

/// Reply of a host agent RPC: either the ids it acted on or an error.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub res: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn removed(ids: Vec<String>) -> Self {
        Self {
            res: Some(ids),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            res: None,
            error: Some(error.into()),
        }
    }
}

/// Transport to the agent running on a given host.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait HostAgentClient: Send + Sync {
    fn invoke<'a>(
        &'a self,
        host_id: &'a str,
        method: &'a str,
        payload: Value,
    ) -> Pin<Box<dyn Future<Output = Result<AgentResponse, RegistryError>> + Send + 'a>>;
}
