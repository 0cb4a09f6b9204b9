//! 配置定义与加载

use crate::balancer::LoadBalanceStrategy;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub registry: RegistryConfig,
    pub balance: Option<BalanceConfig>,
}

/// 注册中心配置
///
/// 会话与每次协调调用都受这里的超时约束，超时以传输错误上抛而不是悬挂。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 注册中心服务器地址列表
    pub endpoints: Vec<String>,
    /// 会话超时（毫秒）
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// 连接超时（毫秒）
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_session_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

impl RegistryConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            session_timeout_ms: default_session_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// 负载均衡配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalanceConfig {
    /// 策略名：round_robin、random、weighted、least_connections、consistent_hash
    pub strategy: String,
}

impl BalanceConfig {
    pub fn strategy(&self) -> LoadBalanceStrategy {
        LoadBalanceStrategy::parse(&self.strategy)
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RpcError::system(format!("failed to read config {path}: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| RpcError::system(format!("failed to parse config {path}: {e}")))?;
        Ok(config)
    }
}
