use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to read deploy plan {path}: {source}")]
    PlanUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid deploy plan: {0}")]
    InvalidPlan(String),

    #[error("invalid service definitions: {0}")]
    InvalidDefinitions(String),

    #[error("no provider implementation named {0}")]
    UnknownProvider(String),

    #[error("failed to instantiate provider {provider}: {reason}")]
    ProviderInstantiation { provider: String, reason: String },

    #[error("service {application}:{service} has no file path")]
    MissingFilePath { application: String, service: String },

    #[error("source file for service {application}:{service} not found at {path}")]
    MissingSourceFile {
        application: String,
        service: String,
        path: PathBuf,
    },

    #[error("handler for service {application}:{service} is not exported by {path}")]
    MissingHandler {
        application: String,
        service: String,
        path: PathBuf,
    },

    #[error("provider {provider} refused service {application}:{service}: {reason}")]
    Registration {
        application: String,
        service: String,
        provider: String,
        reason: String,
    },

    #[error("service {application}:{service} was not registered on any provider")]
    NoProviderAccepted { application: String, service: String },

    #[error("init entry {service} of application {application} names no declared service")]
    UnknownInitService { application: String, service: String },

    #[error("init of {application}:{service} failed: {reason}")]
    InitFailed {
        application: String,
        service: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Failure reported by a provider while accepting a service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProviderError(pub String);

/// Failure returned by a service handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);
