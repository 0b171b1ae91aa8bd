use shoal_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("registry request failed: {0}")]
    Transport(String),

    #[error("registry returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected registry response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
