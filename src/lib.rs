//! Ember RPC Core Library
//!
//! Provides the service-discovery and client-side load-balancing core for the
//! Ember RPC framework: providers publish themselves as ephemeral nodes under
//! host-qualified paths in a coordination store, consumers keep a watch-driven
//! local view of live endpoints per (service, version) and pick one endpoint
//! per call through a pluggable selection strategy.

pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod types;

// 注册发现模块
pub mod registry;

// Re-exports
pub use balancer::{LoadBalanceStrategy, LoadBalancer};
pub use cache::{NodeCache, SelectionCache, ServiceKey};
pub use config::{BalanceConfig, Config, RegistryConfig};
pub use error::{Result, RpcError};
pub use manager::ServiceManager;
pub use message::{
    MessageHeader, RequestBody, ResponseBody, ResponseError, RpcRequest, RpcResponse,
};
pub use types::{DEFAULT_MAX_CONNECTIONS, DEFAULT_SERVICE_VERSION, ServiceInfo};

// 注册发现 re-exports
pub use registry::{
    CoordinationClient, EtcdCoordination, MembershipWatcher, SERVICE_ROOT, ServiceRegistry,
    SessionState, WatchEvent, node_path, service_path,
};
