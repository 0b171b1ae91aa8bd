use shoal_core::{AuthError, HostRefError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("account {0} is not allowed to administer this registry")]
    Unauthorized(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid service identity {0}: application, module and name are required")]
    InvalidIdentity(String),

    #[error(transparent)]
    InvalidHost(#[from] HostRefError),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("no ipv4 or ipv6 address supplied for host {0}")]
    MissingAddress(String),

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("agent on host {host_id} failed: {reason}")]
    Agent { host_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
