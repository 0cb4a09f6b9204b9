//! 服务信息定义

use crate::balancer::LoadBalanceStrategy;
use serde::{Deserialize, Serialize};

/// 默认服务版本号
pub const DEFAULT_SERVICE_VERSION: &str = "1.0";

/// 默认最大连接数
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1000;

/// 服务信息
///
/// `(service_name, version)` 决定服务在命名空间中的持久节点，
/// `host`（或 `host:port`）决定其下的临时子节点。
/// `(service_name, version, host)` 相同的两个实例属于同一个注册槽位，
/// 后一次注册覆盖前一次。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInfo {
    /// 服务名称
    pub service_name: String,

    /// 服务版本号（参与命名空间路径，不同版本互不冲突）
    #[serde(default = "default_version")]
    pub version: String,

    /// 服务器地址
    pub host: String,

    /// 服务端口
    #[serde(default)]
    pub port: u16,

    /// 最大连接数（由连接池协作方消费）
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// 当前连接数（由连接池协作方更新，最少连接策略读取）
    #[serde(default)]
    pub current_connections: u32,

    /// 服务权重（加权策略使用）
    #[serde(default)]
    pub weight: f32,

    /// 服务选择策略（共享的变体标签，不持有策略状态）
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
}

fn default_version() -> String {
    DEFAULT_SERVICE_VERSION.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

impl ServiceInfo {
    /// 创建新的服务信息
    pub fn new(service_name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: default_version(),
            host: host.into(),
            port: 0,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            current_connections: 0,
            weight: 0.0,
            strategy: LoadBalanceStrategy::default(),
        }
    }

    /// 创建仅带服务名的查询用服务信息
    pub fn named(service_name: impl Into<String>) -> Self {
        Self::new(service_name, "")
    }

    /// 设置版本号
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// 设置当前连接数
    pub fn with_current_connections(mut self, current_connections: u32) -> Self {
        self.current_connections = current_connections;
        self
    }

    /// 设置最大连接数
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// 设置选择策略
    pub fn with_strategy(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 服务地址，格式：host:port
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 是否与另一实例属于同一个注册槽位
    pub fn same_slot(&self, other: &ServiceInfo) -> bool {
        self.service_name == other.service_name
            && self.version == other.version
            && self.host == other.host
    }
}
