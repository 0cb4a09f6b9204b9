//! 协调服务抽象
//!
//! 把底层协调存储抽象成带临时节点、持久节点与变更通知的层级 KV。
//! 监听不回调进调用方线程，而是把 [`WatchEvent`] 投递进 mpsc 通道，
//! 由单任务的刷新循环串行消费，避免多投递线程并发改写缓存。

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 会话已建立
    Connected,
    /// 会话断开后重新建立（临时节点已丢失，需要重新发布）
    Reconnected,
    /// 会话过期
    Expired,
    /// 连接断开
    Disconnected,
}

/// 监听事件
///
/// 每个事件都只是 "现在去刷新" 的信号，不携带增量；
/// 消费方必须容忍重复与乱序投递。
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// 某服务节点下的子节点列表发生变化
    ChildrenChanged { path: String },
    /// 某节点的数据发生变化
    DataChanged { path: String },
    /// 会话状态变迁
    StateChanged(SessionState),
}

/// 协调服务客户端契约
///
/// 节点增删查改均为同步网络调用，可能阻塞调用任务；
/// 超时按配置生效，以 [`crate::error::RpcError::Transport`] 上抛。
/// 同一会话内对同一节点的写入按下发顺序可见，跨节点无原子性。
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// 节点是否存在
    async fn exists(&self, path: &str) -> Result<bool>;

    /// 创建持久节点；`recursive` 时补齐缺失的祖先节点
    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()>;

    /// 创建临时节点，随会话结束自动消失
    async fn create_ephemeral(&self, path: &str, payload: Vec<u8>) -> Result<()>;

    /// 覆盖写节点数据
    async fn write_data(&self, path: &str, payload: Vec<u8>) -> Result<()>;

    /// 读取节点数据
    async fn read_data(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// 列出直接子节点名
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    /// 删除节点；节点不存在时返回 false
    async fn delete(&self, path: &str) -> Result<bool>;

    /// 递归删除子树；子树不存在视为删除成功
    async fn delete_recursive(&self, path: &str) -> Result<bool>;

    /// 订阅某节点下子节点列表变化
    async fn subscribe_child_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()>;

    /// 订阅某节点的数据变化
    async fn subscribe_data_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()>;

    /// 订阅会话状态变迁
    async fn subscribe_state_changes(&self, events: mpsc::Sender<WatchEvent>) -> Result<()>;
}
