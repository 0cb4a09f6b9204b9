//! Ember RPC 统一错误类型
//!
//! 注册与选路两条路径共用同一个错误枚举。错误传播策略：
//! 注册路径的参数错误立即抛给调用方；查找/注销空白标识降级为安全空操作；
//! 会话与传输错误必须向上暴露而不是静默吞掉。

use thiserror::Error;

/// 统一结果类型
pub type Result<T> = std::result::Result<T, RpcError>;

/// Ember RPC 统一错误类型
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    /// 非法参数（如注册时服务名或主机为空白）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 缺失服务信息（注册中心级的运行时错误，区别于参数错误）
    #[error("invalid service: service info is missing")]
    NullService,

    /// 传输/会话错误（注册中心不可达、超时、会话过期）
    #[error("transport error: {0}")]
    Transport(String),

    /// 序列化/反序列化错误
    #[error("serialization error: {0}")]
    Serialization(String),

    /// 无可用服务节点（对调用方即 "service unavailable"）
    #[error("no live node for service: {service}")]
    EmptyNodeSet { service: String },

    /// 系统内部错误
    #[error("system error: {0}")]
    System(String),
}

impl RpcError {
    /// 创建非法参数错误
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RpcError::InvalidArgument(msg.into())
    }

    /// 创建传输错误
    pub fn transport(msg: impl Into<String>) -> Self {
        RpcError::Transport(msg.into())
    }

    /// 创建无可用节点错误
    pub fn empty_node_set(service: impl Into<String>) -> Self {
        RpcError::EmptyNodeSet {
            service: service.into(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        RpcError::System(msg.into())
    }

    /// 是否为 "service unavailable" 类错误
    pub fn is_empty_node_set(&self) -> bool {
        matches!(self, RpcError::EmptyNodeSet { .. })
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Serialization(e.to_string())
    }
}
