//! 成员变更监听
//!
//! 单任务事件循环：协调客户端的投递线程只往通道里塞事件，
//! 这里串行消费，缓存永远只被一个任务改写。
//! 每个事件都按 "现在去刷新" 处理，天然容忍重复与乱序投递。

use super::coordination::{SessionState, WatchEvent};
use super::service_registry::{ServiceRegistry, parse_service_path};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 成员变更监听器
pub struct MembershipWatcher {
    registry: Arc<ServiceRegistry>,
    events: mpsc::Receiver<WatchEvent>,
}

impl MembershipWatcher {
    /// 启动监听循环，返回其任务句柄
    pub fn spawn(
        registry: Arc<ServiceRegistry>,
        events: mpsc::Receiver<WatchEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let watcher = Self { registry, events };
        tokio::spawn(watcher.run())
    }

    async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                WatchEvent::ChildrenChanged { path } => {
                    debug!(path = %path, "child list changed");
                    self.refresh_path(&path).await;
                }
                WatchEvent::DataChanged { path } => {
                    debug!(path = %path, "node data changed");
                    self.refresh_path(&path).await;
                }
                WatchEvent::StateChanged(state) => self.handle_state(state).await,
            }
        }
        debug!("membership watcher stopped");
    }

    /// 重新拉取受影响服务的存活端点并替换快照
    async fn refresh_path(&self, path: &str) {
        let Some((service_name, version)) = parse_service_path(path) else {
            warn!(path = %path, "watch event for unrecognized path");
            return;
        };
        if let Err(e) = self.registry.refresh_service(&service_name, &version).await {
            warn!(
                service = %service_name,
                version = %version,
                error = %e,
                "failed to refresh node snapshot"
            );
        }
    }

    async fn handle_state(&self, state: SessionState) {
        match state {
            SessionState::Expired => {
                // 临时节点已随旧会话消失，立即尝试重新发布；
                // 若新会话尚未就绪，Reconnected 事件会再触发一轮
                warn!("coordination session expired, re-registering active services");
                self.reregister_active().await;
            }
            SessionState::Reconnected => {
                info!("coordination session re-established, re-registering active services");
                self.reregister_active().await;
            }
            SessionState::Connected => debug!("coordination session connected"),
            SessionState::Disconnected => warn!("coordination session disconnected"),
        }
    }

    /// 重新发布本进程持有的全部 Active 槽位
    async fn reregister_active(&self) {
        let services = self.registry.active_registrations().await;
        let mut failures = 0usize;
        for service in &services {
            if let Err(e) = self.registry.reconnect(service).await {
                failures += 1;
                warn!(
                    service = %service.service_name,
                    host = %service.host,
                    error = %e,
                    "failed to re-register service"
                );
            }
        }
        if failures > 0 {
            // 反复失败意味着本提供方对发现系统不可见，必须显式暴露
            error!(
                failed = failures,
                total = services.len(),
                "re-registration incomplete, provider instance is invisible to discovery"
            );
        } else if !services.is_empty() {
            info!(count = services.len(), "re-registered all active services");
        }
    }
}
