//! etcd 协调服务实现
//!
//! 把层级节点契约映射到 etcd：
//! - 持久节点 = 普通 key（空值即可），子节点 = `path/` 前缀下的 key；
//! - 临时节点 = 挂在会话租约上的 key，整个客户端共享一个租约，
//!   租约失守即会话过期，其上全部临时节点随之消失；
//! - 变更通知 = exact/prefix watch 流，转发为 [`WatchEvent`]。

use super::coordination::{CoordinationClient, SessionState, WatchEvent};
use crate::config::RegistryConfig;
use crate::error::{Result, RpcError};
use async_trait::async_trait;
use etcd_client::{
    Client, ConnectOptions, DeleteOptions, GetOptions, PutOptions, WatchOptions,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, warn};

/// etcd 协调服务客户端
pub struct EtcdCoordination {
    client: Client,
    /// 会话租约，保活失败后重建并换新
    lease_id: Arc<Mutex<i64>>,
    state_subscribers: Arc<Mutex<Vec<mpsc::Sender<WatchEvent>>>>,
    keep_alive_handle: tokio::task::JoinHandle<()>,
}

impl EtcdCoordination {
    /// 按配置建立会话：连接、授予会话租约、启动保活任务
    pub async fn connect(config: &RegistryConfig) -> Result<Self> {
        let options = ConnectOptions::new()
            .with_connect_timeout(config.connect_timeout())
            .with_timeout(config.session_timeout());
        let mut client = Client::connect(&config.endpoints, Some(options))
            .await
            .map_err(|e| RpcError::transport(format!("failed to connect to etcd: {e}")))?;

        let ttl = (config.session_timeout_ms / 1000).max(1) as i64;
        let lease = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| RpcError::transport(format!("failed to grant session lease: {e}")))?;
        info!(lease = lease.id(), ttl, "coordination session established");

        let lease_id = Arc::new(Mutex::new(lease.id()));
        let state_subscribers = Arc::new(Mutex::new(Vec::new()));
        let keep_alive_handle = tokio::spawn(run_keep_alive(
            client.clone(),
            lease_id.clone(),
            ttl,
            state_subscribers.clone(),
        ));

        Ok(Self {
            client,
            lease_id,
            state_subscribers,
            keep_alive_handle,
        })
    }
}

/// 会话保活循环
///
/// 续约失败视为会话过期：广播 `Expired`，重建租约成功后广播 `Reconnected`。
/// 旧租约上的临时节点已丢失，重新发布由监听方负责。
async fn run_keep_alive(
    mut client: Client,
    lease_id: Arc<Mutex<i64>>,
    ttl: i64,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<WatchEvent>>>>,
) {
    loop {
        tokio::time::sleep(Duration::from_secs((ttl as u64 / 3).max(1))).await;

        let id = *lease_id.lock().await;
        let alive = match client.lease_keep_alive(id).await {
            Ok((mut keeper, mut stream)) => match keeper.keep_alive().await {
                Ok(()) => match stream.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => true,
                    Ok(_) => false,
                    Err(e) => {
                        warn!(error = %e, "lease keep-alive stream error");
                        false
                    }
                },
                Err(e) => {
                    warn!(error = %e, "lease keep-alive request failed");
                    false
                }
            },
            Err(e) => {
                warn!(error = %e, "lease keep-alive failed");
                false
            }
        };
        if alive {
            continue;
        }

        error!(lease = id, "coordination session expired");
        broadcast_state(&subscribers, SessionState::Expired).await;

        loop {
            match client.lease_grant(ttl, None).await {
                Ok(lease) => {
                    *lease_id.lock().await = lease.id();
                    info!(lease = lease.id(), "coordination session re-established");
                    broadcast_state(&subscribers, SessionState::Reconnected).await;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "failed to rebuild session lease, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

async fn broadcast_state(
    subscribers: &Mutex<Vec<mpsc::Sender<WatchEvent>>>,
    state: SessionState,
) {
    let senders = subscribers.lock().await.clone();
    for tx in senders {
        let _ = tx.send(WatchEvent::StateChanged(state)).await;
    }
}

/// 路径自身及其全部祖先，自浅到深
fn ancestor_paths(path: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        paths.push(current.clone());
    }
    paths
}

fn child_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[async_trait]
impl CoordinationClient for EtcdCoordination {
    async fn exists(&self, path: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client
            .get(path, Some(GetOptions::new().with_count_only()))
            .await
            .map_err(|e| RpcError::transport(format!("failed to check {path}: {e}")))?;
        Ok(resp.count() > 0)
    }

    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()> {
        let mut client = self.client.clone();
        let paths = if recursive {
            ancestor_paths(path)
        } else {
            vec![path.to_string()]
        };
        for node in paths {
            client
                .put(node.clone(), Vec::new(), None)
                .await
                .map_err(|e| {
                    RpcError::transport(format!("failed to create persistent node {node}: {e}"))
                })?;
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        let lease = *self.lease_id.lock().await;
        let mut client = self.client.clone();
        client
            .put(path, payload, Some(PutOptions::new().with_lease(lease)))
            .await
            .map_err(|e| {
                RpcError::transport(format!("failed to create ephemeral node {path}: {e}"))
            })?;
        debug!(path, lease, "ephemeral node created");
        Ok(())
    }

    async fn write_data(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        let mut client = self.client.clone();
        let resp = client
            .get(path, None)
            .await
            .map_err(|e| RpcError::transport(format!("failed to read {path}: {e}")))?;
        // 临时节点重写时挂回当前会话租约，持久节点保持无租约
        let options = match resp.kvs().first() {
            Some(kv) if kv.lease() != 0 => {
                let lease = *self.lease_id.lock().await;
                Some(PutOptions::new().with_lease(lease))
            }
            _ => None,
        };
        client
            .put(path, payload, options)
            .await
            .map_err(|e| RpcError::transport(format!("failed to write {path}: {e}")))?;
        Ok(())
    }

    async fn read_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client
            .get(path, None)
            .await
            .map_err(|e| RpcError::transport(format!("failed to read {path}: {e}")))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let prefix = child_prefix(path);
        let mut client = self.client.clone();
        let resp = client
            .get(
                prefix.clone(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await
            .map_err(|e| RpcError::transport(format!("failed to list children of {path}: {e}")))?;

        let mut children = BTreeSet::new();
        for kv in resp.kvs() {
            let key = String::from_utf8_lossy(kv.key()).to_string();
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next() {
                    if !first.is_empty() {
                        children.insert(first.to_string());
                    }
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client
            .delete(path, None)
            .await
            .map_err(|e| RpcError::transport(format!("failed to delete {path}: {e}")))?;
        Ok(resp.deleted() > 0)
    }

    async fn delete_recursive(&self, path: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let mut deleted = client
            .delete(path, None)
            .await
            .map_err(|e| RpcError::transport(format!("failed to delete {path}: {e}")))?
            .deleted();
        deleted += client
            .delete(
                child_prefix(path),
                Some(DeleteOptions::new().with_prefix()),
            )
            .await
            .map_err(|e| RpcError::transport(format!("failed to delete subtree {path}: {e}")))?
            .deleted();
        debug!(path, deleted, "subtree removed");
        // 子树本就不存在也算删除成功
        Ok(true)
    }

    async fn subscribe_child_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()> {
        let prefix = child_prefix(path);
        let service_path = path.to_string();
        let mut client = self.client.clone();

        tokio::spawn(async move {
            let (_watcher, mut stream) = match client
                .watch(prefix, Some(WatchOptions::new().with_prefix()))
                .await
            {
                Ok(pair) => pair,
                Err(e) => {
                    error!(path = %service_path, error = %e, "failed to install child watch");
                    return;
                }
            };
            loop {
                match stream.message().await {
                    Ok(Some(_resp)) => {
                        let event = WatchEvent::ChildrenChanged {
                            path: service_path.clone(),
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %service_path, error = %e, "child watch stream error");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn subscribe_data_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()> {
        let node_path = path.to_string();
        let mut client = self.client.clone();

        tokio::spawn(async move {
            let (_watcher, mut stream) = match client.watch(node_path.clone(), None).await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(path = %node_path, error = %e, "failed to install data watch");
                    return;
                }
            };
            loop {
                match stream.message().await {
                    Ok(Some(_resp)) => {
                        let event = WatchEvent::DataChanged {
                            path: node_path.clone(),
                        };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(path = %node_path, error = %e, "data watch stream error");
                        break;
                    }
                }
            }
        });
        Ok(())
    }

    async fn subscribe_state_changes(&self, events: mpsc::Sender<WatchEvent>) -> Result<()> {
        self.state_subscribers.lock().await.push(events);
        Ok(())
    }
}

impl Drop for EtcdCoordination {
    fn drop(&mut self) {
        self.keep_alive_handle.abort();
    }
}
