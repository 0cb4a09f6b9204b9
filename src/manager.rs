//! 服务管理器
//!
//! 进程级上下文：持有注入的协调会话、服务注册器、负载均衡器与
//! 成员监听任务。显式构造、显式关停，不依赖隐藏的全局单例。

use crate::balancer::{LoadBalanceStrategy, LoadBalancer};
use crate::cache::NodeCache;
use crate::error::{Result, RpcError};
use crate::registry::{CoordinationClient, MembershipWatcher, ServiceRegistry};
use crate::types::{DEFAULT_SERVICE_VERSION, ServiceInfo};
use std::sync::Arc;
use tokio::sync::mpsc;

/// 监听事件通道容量
const WATCH_CHANNEL_CAPACITY: usize = 64;

/// 服务管理器
///
/// 消费方的入口：`choose` 基于监听维护的快照选出一个端点，
/// 快照缺失时按需拉取一次；无存活端点以 "service unavailable" 上抛。
pub struct ServiceManager {
    registry: Arc<ServiceRegistry>,
    balancer: LoadBalancer,
    watcher: tokio::task::JoinHandle<()>,
}

impl ServiceManager {
    /// 创建服务管理器，接管传入的协调会话
    pub fn new(client: Arc<dyn CoordinationClient>, strategy: LoadBalanceStrategy) -> Self {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let nodes = Arc::new(NodeCache::new());
        let registry = Arc::new(ServiceRegistry::new(client, nodes, tx));
        let watcher = MembershipWatcher::spawn(registry.clone(), rx);
        Self {
            registry,
            balancer: LoadBalancer::new(strategy),
            watcher,
        }
    }

    /// 底层注册器
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// 底层负载均衡器
    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// 注册服务
    pub async fn register_service(&self, service: &ServiceInfo) -> Result<bool> {
        self.registry.register(service).await
    }

    /// 注销整个服务
    pub async fn unregister_service(&self, service_name: &str) -> Result<bool> {
        self.registry.unregister_service(service_name).await
    }

    /// 注销单个端点
    pub async fn unregister_host(&self, service_name: &str, host: &str) -> Result<bool> {
        self.registry.unregister_host(service_name, host).await
    }

    /// 获取某服务的存活端点列表（优先本地快照，缺失时按需拉取）
    pub async fn get_services(
        &self,
        service_name: &str,
        version: &str,
    ) -> Result<Vec<ServiceInfo>> {
        if let Some(snapshot) = self.registry.cached_nodes(service_name, version).await {
            return Ok((*snapshot).clone());
        }
        self.registry.refresh_service(service_name, version).await
    }

    /// 为一次调用选出一个端点（默认版本）
    pub async fn choose(&self, service_name: &str) -> Result<ServiceInfo> {
        self.choose_node(service_name, DEFAULT_SERVICE_VERSION, None)
            .await
    }

    /// 为一次调用选出一个端点，`key` 为一致性哈希路由键
    pub async fn choose_with_key(&self, service_name: &str, key: &str) -> Result<ServiceInfo> {
        self.choose_node(service_name, DEFAULT_SERVICE_VERSION, Some(key))
            .await
    }

    /// 为一次调用选出一个端点（显式版本与路由键）
    pub async fn choose_node(
        &self,
        service_name: &str,
        version: &str,
        key: Option<&str>,
    ) -> Result<ServiceInfo> {
        let nodes = self.get_services(service_name, version).await?;
        if nodes.is_empty() {
            return Err(RpcError::empty_node_set(service_name));
        }
        self.balancer
            .choose_with_key(service_name, &nodes, key)
            .await
    }

    /// 最近一次选择是否完成了该服务当前快照的一整轮轮转
    pub async fn is_last_node(&self, service_name: &str, version: &str) -> bool {
        let Some(snapshot) = self.registry.cached_nodes(service_name, version).await else {
            return false;
        };
        self.balancer.is_last_node(service_name, &snapshot).await
    }

    /// 关停：停止成员监听任务
    pub fn shutdown(&self) {
        self.watcher.abort();
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}
