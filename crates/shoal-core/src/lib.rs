//! Shared vocabulary of the Shoal control plane: persisted rows, host
//! references, the store contract and the token oracle.

pub mod auth;
pub mod error;
pub mod host;
pub mod model;
pub mod store;

pub use auth::{AccountIdentity, StaticTokenValidator, TokenValidator};
pub use error::{AuthError, HostRefError, StoreError};
pub use host::{HostAddress, HostRef};
pub use model::{
    CONTROL_PLANE_APPLICATION, CpuLoad, DeployResult, EntryType, LoadSample, MemLoad, Resource,
    ResourceStatus, ResourceType, RuntimeEntry, RuntimeRecord, RuntimeStatus, Service,
    ServiceArgument, ServiceIdentity, ServiceRuntime, WILDCARD,
};
pub use store::{Filter, MemoryStore, Order, Query, Row, RuntimeStore, Table};
