//! 服务注册器
//!
//! 持有注入的协调会话，负责节点生命周期：
//! `Unregistered -> Registering（持久节点就绪）-> Active（临时节点 + 监听就绪）
//! -> { Reconnecting -> Active | Removed }`。
//! 持久父节点与临时子节点是两次独立写入，父节点存在而子节点尚未出现的
//! 窗口是允许的，读取方需容忍 "服务已知、暂无存活端点"。

use super::coordination::{CoordinationClient, WatchEvent};
use crate::cache::{NodeCache, ServiceKey};
use crate::error::{Result, RpcError};
use crate::types::ServiceInfo;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};

/// 命名空间根节点
pub const SERVICE_ROOT: &str = "/rpc/services";

/// 服务持久节点路径：`/rpc/services/v_<version>/<service_name>`
pub fn service_path(service_name: &str, version: &str) -> String {
    format!("{SERVICE_ROOT}/v_{version}/{service_name}")
}

/// 端点临时节点路径：`<service_path>/<host>`
pub fn node_path(service_name: &str, version: &str, host: &str) -> String {
    format!("{}/{}", service_path(service_name, version), host)
}

/// 从服务路径或端点路径解析出（服务名, 版本号）
pub(crate) fn parse_service_path(path: &str) -> Option<(String, String)> {
    let rest = path.strip_prefix(SERVICE_ROOT)?.strip_prefix("/v_")?;
    let mut parts = rest.splitn(3, '/');
    let version = parts.next()?;
    let service_name = parts.next()?;
    if version.is_empty() || service_name.is_empty() {
        return None;
    }
    Some((service_name.to_string(), version.to_string()))
}

/// 注册槽位键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKey {
    service_name: String,
    version: String,
    host: String,
}

impl SlotKey {
    fn of(service: &ServiceInfo) -> Self {
        Self {
            service_name: service.service_name.clone(),
            version: service.version.clone(),
            host: service.host.clone(),
        }
    }
}

/// 服务注册器
///
/// 协调会话由外部构造并注入，进程内共享一个实例。
pub struct ServiceRegistry {
    client: Arc<dyn CoordinationClient>,
    nodes: Arc<NodeCache>,
    /// 本进程持有的 Active 注册槽位，会话过期后据此重新发布
    active: RwLock<HashMap<SlotKey, ServiceInfo>>,
    events: mpsc::Sender<WatchEvent>,
    watched: Mutex<HashSet<String>>,
    state_watch_installed: AtomicBool,
}

impl ServiceRegistry {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        nodes: Arc<NodeCache>,
        events: mpsc::Sender<WatchEvent>,
    ) -> Self {
        Self {
            client,
            nodes,
            active: RwLock::new(HashMap::new()),
            events,
            watched: Mutex::new(HashSet::new()),
            state_watch_installed: AtomicBool::new(false),
        }
    }

    /// 注册服务
    ///
    /// 确保持久服务节点存在，在其下创建负载为 JSON 服务信息的临时节点，
    /// 并安装子节点/数据/会话状态监听。
    pub async fn register(&self, service: &ServiceInfo) -> Result<bool> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Err(RpcError::invalid_argument("invalid service name"));
        }
        let host = service.host.trim();
        if host.is_empty() {
            return Err(RpcError::invalid_argument("invalid service host"));
        }

        let spath = self.ensure_service_node(service_name, &service.version).await?;
        let npath = node_path(service_name, &service.version, host);
        let payload = serde_json::to_vec(service)?;
        self.client.create_ephemeral(&npath, payload).await?;

        self.install_watches(&spath).await?;

        {
            let mut active = self.active.write().await;
            active.insert(SlotKey::of(service), service.clone());
        }

        if let Err(e) = self.refresh_service(service_name, &service.version).await {
            warn!(service = service_name, error = %e, "failed to warm node snapshot");
        }

        info!(
            service = service_name,
            version = %service.version,
            host,
            port = service.port,
            "service registered"
        );
        Ok(true)
    }

    /// 会话丢失或数据变化后的幂等重发布
    ///
    /// 节点仍在则覆盖其负载，否则重建临时节点；监听视为仍然有效，不重装。
    pub async fn reconnect(&self, service: &ServiceInfo) -> Result<bool> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Err(RpcError::invalid_argument("invalid service name"));
        }
        let host = service.host.trim();
        if host.is_empty() {
            return Err(RpcError::invalid_argument("invalid service host"));
        }

        self.ensure_service_node(service_name, &service.version).await?;
        let npath = node_path(service_name, &service.version, host);
        let payload = serde_json::to_vec(service)?;
        if self.client.exists(&npath).await? {
            self.client.write_data(&npath, payload).await?;
        } else {
            self.client.create_ephemeral(&npath, payload).await?;
        }

        info!(service = service_name, host, "service re-registered");
        Ok(true)
    }

    /// `reconnect` 的 API 别名
    pub async fn register_again(&self, service: &ServiceInfo) -> Result<bool> {
        self.reconnect(service).await
    }

    /// 注销服务
    ///
    /// 服务名为空白视为无事可做的成功；主机为空白递归移除整个服务子树，
    /// 否则只移除对应端点节点。
    pub async fn unregister(&self, service: &ServiceInfo) -> Result<bool> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Ok(true);
        }
        let version = service.version.as_str();
        let host = service.host.trim();

        let removed = if host.is_empty() {
            let removed = self
                .client
                .delete_recursive(&service_path(service_name, version))
                .await?;
            self.nodes
                .remove(&ServiceKey::new(service_name, version))
                .await;
            let mut active = self.active.write().await;
            active.retain(|k, _| !(k.service_name == service_name && k.version == version));
            removed
        } else {
            let removed = self
                .client
                .delete(&node_path(service_name, version, host))
                .await?;
            {
                let mut active = self.active.write().await;
                active.remove(&SlotKey {
                    service_name: service_name.to_string(),
                    version: version.to_string(),
                    host: host.to_string(),
                });
            }
            if let Err(e) = self.refresh_service(service_name, version).await {
                warn!(service = service_name, error = %e, "failed to refresh after unregister");
            }
            removed
        };

        info!(service = service_name, host, removed, "service unregistered");
        Ok(removed)
    }

    /// 按服务名注销（整个子树）
    pub async fn unregister_service(&self, service_name: &str) -> Result<bool> {
        self.unregister(&ServiceInfo::named(service_name)).await
    }

    /// 按服务名与主机注销单个端点
    pub async fn unregister_host(&self, service_name: &str, host: &str) -> Result<bool> {
        self.unregister(&ServiceInfo::new(service_name, host)).await
    }

    /// 节点是否存在
    ///
    /// 服务名空白恒为 false；主机空白查服务级节点，否则查具体端点节点。
    pub async fn has_node(&self, service: &ServiceInfo) -> Result<bool> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Ok(false);
        }
        let host = service.host.trim();
        if host.is_empty() {
            self.client
                .exists(&service_path(service_name, &service.version))
                .await
        } else {
            self.client
                .exists(&node_path(service_name, &service.version, host))
                .await
        }
    }

    /// 按服务名查询服务是否存在
    pub async fn has_service(&self, service_name: &str) -> Result<bool> {
        self.has_node(&ServiceInfo::named(service_name)).await
    }

    /// 按服务名与主机查询端点是否存在
    pub async fn has_service_host(&self, service_name: &str, host: &str) -> Result<bool> {
        self.has_node(&ServiceInfo::new(service_name, host)).await
    }

    /// 查找服务节点（读取监听维护的本地快照，不发起网络调用）
    pub async fn find_node(&self, service: &ServiceInfo) -> Result<Option<ServiceInfo>> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Ok(None);
        }
        let key = ServiceKey::new(service_name, service.version.clone());
        let Some(snapshot) = self.nodes.get(&key).await else {
            return Ok(None);
        };
        let host = service.host.trim();
        if host.is_empty() {
            Ok(snapshot.first().cloned())
        } else {
            Ok(snapshot.iter().find(|n| n.host == host).cloned())
        }
    }

    /// 查找服务节点，先强制从注册中心拉取一次再查
    pub async fn find_node_refresh(&self, service: &ServiceInfo) -> Result<Option<ServiceInfo>> {
        let service_name = service.service_name.trim();
        if service_name.is_empty() {
            return Ok(None);
        }
        self.refresh_service(service_name, &service.version).await?;
        self.find_node(service).await
    }

    /// 按服务名查找服务
    pub async fn find_service(&self, service_name: &str) -> Result<Option<ServiceInfo>> {
        self.find_node(&ServiceInfo::named(service_name)).await
    }

    /// 按服务名与主机查找服务
    pub async fn find_service_host(
        &self,
        service_name: &str,
        host: &str,
    ) -> Result<Option<ServiceInfo>> {
        self.find_node(&ServiceInfo::new(service_name, host)).await
    }

    /// 从注册中心拉取某服务的存活端点并整体替换本地快照
    pub async fn refresh_service(
        &self,
        service_name: &str,
        version: &str,
    ) -> Result<Vec<ServiceInfo>> {
        let spath = service_path(service_name, version);
        let mut children = self.client.get_children(&spath).await?;
        children.sort();

        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            let npath = format!("{spath}/{child}");
            match self.client.read_data(&npath).await? {
                Some(data) => match serde_json::from_slice::<ServiceInfo>(&data) {
                    Ok(info) => nodes.push(info),
                    Err(e) => {
                        warn!(path = %npath, error = %e, "skipping undecodable node payload")
                    }
                },
                None => debug!(path = %npath, "node vanished during refresh"),
            }
        }

        debug!(
            service = service_name,
            version,
            count = nodes.len(),
            "node snapshot refreshed"
        );
        self.nodes
            .put(ServiceKey::new(service_name, version), nodes.clone())
            .await;
        Ok(nodes)
    }

    /// 当前缓存的节点快照
    pub async fn cached_nodes(
        &self,
        service_name: &str,
        version: &str,
    ) -> Option<Arc<Vec<ServiceInfo>>> {
        self.nodes.get(&ServiceKey::new(service_name, version)).await
    }

    /// 本进程持有的 Active 注册槽位
    pub async fn active_registrations(&self) -> Vec<ServiceInfo> {
        let active = self.active.read().await;
        active.values().cloned().collect()
    }

    /// 确保持久服务节点存在，返回其路径
    async fn ensure_service_node(&self, service_name: &str, version: &str) -> Result<String> {
        let spath = service_path(service_name, version);
        if !self.client.exists(&spath).await? {
            self.client.create_persistent(&spath, true).await?;
        }
        Ok(spath)
    }

    /// 安装某服务的子节点/数据监听与进程级的会话状态监听，均只装一次
    async fn install_watches(&self, spath: &str) -> Result<()> {
        {
            let mut watched = self.watched.lock().await;
            if !watched.contains(spath) {
                self.client
                    .subscribe_child_changes(spath, self.events.clone())
                    .await?;
                self.client
                    .subscribe_data_changes(spath, self.events.clone())
                    .await?;
                watched.insert(spath.to_string());
            }
        }

        if self
            .state_watch_installed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            if let Err(e) = self.client.subscribe_state_changes(self.events.clone()).await {
                self.state_watch_installed.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(())
    }
}
