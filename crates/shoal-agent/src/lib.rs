//! Host agent for the Shoal control plane.
//!
//! Registers the host with the registry, retrying until an id is assigned,
//! then reports CPU and memory load every interval. Deploy results uploaded
//! for the host are kept in a [`HostedRuntimes`] ledger so the registry can
//! ask the agent to tear services down through [`AgentRpc`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use shoal_agent::{HttpRegistryClient, SystemLoadSampler, start_host};
//! use shoal_core::Resource;
//!
//! # async fn run() {
//! let host = Resource {
//!     name: "web1".into(),
//!     account: "acme".into(),
//!     ..Default::default()
//! };
//! let client = Arc::new(HttpRegistryClient::new("http://registry:7400", None));
//! let sampler = Arc::new(SystemLoadSampler::new());
//! let agent = start_host(host, Duration::from_secs(5), client, sampler);
//! agent.shutdown().await;
//! # }
//! ```

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod rpc;
pub mod sampler;

pub use client::{HttpHostAgentClient, HttpRegistryClient, LocalRegistryClient, RegistryClient};
pub use error::AgentError;
pub use heartbeat::{AgentHandle, start_host};
pub use rpc::{AgentRpc, HostedRuntime, HostedRuntimes, serve_agent_rpc};
pub use sampler::{HostLoad, LoadSampler, SystemLoadSampler};
