//! 进程级共享缓存
//!
//! 两类缓存：
//! - [`NodeCache`]：按服务维度缓存的存活节点快照，快照为不可变 `Arc`，
//!   监听回调整体替换，读取方拿到的轮转视图不会被刷新打断。
//! - [`SelectionCache`]：按（策略, 服务）维度的选择状态表，每个条目
//!   持有自己的锁，不相关服务之间不产生伪竞争。

use crate::balancer::LoadBalanceStrategy;
use crate::types::ServiceInfo;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// 服务缓存键：服务名 + 版本号
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub service_name: String,
    pub version: String,
}

impl ServiceKey {
    pub fn new(service_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: version.into(),
        }
    }
}

/// 存活节点快照缓存
///
/// 生命周期与进程一致：首次使用时创建，监听驱动刷新，不显式销毁。
#[derive(Default)]
pub struct NodeCache {
    snapshots: RwLock<HashMap<ServiceKey, Arc<Vec<ServiceInfo>>>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取某服务的节点快照
    pub async fn get(&self, key: &ServiceKey) -> Option<Arc<Vec<ServiceInfo>>> {
        let snapshots = self.snapshots.read().await;
        snapshots.get(key).cloned()
    }

    /// 整体替换某服务的节点快照
    pub async fn put(&self, key: ServiceKey, nodes: Vec<ServiceInfo>) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key, Arc::new(nodes));
    }

    /// 移除某服务的节点快照
    pub async fn remove(&self, key: &ServiceKey) {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(key);
    }

    /// 当前已缓存的服务键
    pub async fn keys(&self) -> Vec<ServiceKey> {
        let snapshots = self.snapshots.read().await;
        snapshots.keys().cloned().collect()
    }
}

/// 选择状态键：策略种类 + 服务名
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    pub strategy: LoadBalanceStrategy,
    pub service_name: String,
}

/// 策略私有的选择状态
#[derive(Debug, Default)]
pub struct SelectionState {
    /// 轮询游标，始终落在 `[0, nodes.len() - 1]` 内；`None` 表示尚未选择过
    pub cursor: Option<usize>,
}

/// 选择状态缓存
///
/// 外层读写锁只负责条目的创建与查找，状态的读改写在条目自身的互斥锁下进行。
#[derive(Default)]
pub struct SelectionCache {
    entries: RwLock<HashMap<SelectionKey, Arc<Mutex<SelectionState>>>>,
}

impl SelectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取（不存在则创建）某（策略, 服务）的状态条目
    pub async fn entry(
        &self,
        strategy: LoadBalanceStrategy,
        service_name: &str,
    ) -> Arc<Mutex<SelectionState>> {
        let key = SelectionKey {
            strategy,
            service_name: service_name.to_string(),
        };
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                return entry.clone();
            }
        }
        let mut entries = self.entries.write().await;
        entries
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(SelectionState::default())))
            .clone()
    }

    /// 读取当前轮询游标
    pub async fn cursor(
        &self,
        strategy: LoadBalanceStrategy,
        service_name: &str,
    ) -> Option<usize> {
        let entry = self.entry(strategy, service_name).await;
        let state = entry.lock().await;
        state.cursor
    }
}
