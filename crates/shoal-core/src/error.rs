use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("row in table {table} could not be decoded: {reason}")]
    Decode { table: String, reason: String },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid token")]
    InvalidToken,

    #[error("token validator unavailable: {0}")]
    Unavailable(String),
}

/// Failures while turning a host string into a resource reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostRefError {
    #[error("invalid host reference {0:?}, expected \"account@hostname\" or a resource id")]
    Malformed(String),

    #[error("host reference {host:?} matches {matches} resources")]
    Ambiguous { host: String, matches: usize },
}
