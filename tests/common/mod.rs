//! 测试用内存协调服务
//!
//! 按协调契约实现的进程内存储，带可控的会话过期开关，
//! 让注册/监听/重注册路径可以在无外部依赖下做确定性验证。

use async_trait::async_trait;
use ember_rpc_core::error::{Result, RpcError};
use ember_rpc_core::registry::{CoordinationClient, SessionState, WatchEvent};
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone)]
struct Node {
    payload: Vec<u8>,
    ephemeral: bool,
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    child_subs: Vec<(String, mpsc::Sender<WatchEvent>)>,
    data_subs: Vec<(String, mpsc::Sender<WatchEvent>)>,
    state_subs: Vec<mpsc::Sender<WatchEvent>>,
}

/// 内存协调服务客户端
#[derive(Default)]
pub struct MemoryCoordination {
    state: Mutex<State>,
}

fn parent_path(path: &str) -> Option<String> {
    path.rsplit_once('/').map(|(parent, _)| parent.to_string())
}

fn child_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟会话过期：临时节点全部消失，随后投递 Expired 与 Reconnected
    pub async fn expire_session(&self) {
        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            let ephemeral: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.ephemeral)
                .map(|(path, _)| path.clone())
                .collect();
            for path in &ephemeral {
                state.nodes.remove(path);
            }

            let parents: BTreeSet<String> =
                ephemeral.iter().filter_map(|p| parent_path(p)).collect();
            for (path, tx) in &state.child_subs {
                if parents.contains(path) {
                    events.push((
                        tx.clone(),
                        WatchEvent::ChildrenChanged { path: path.clone() },
                    ));
                }
            }
            for tx in &state.state_subs {
                events.push((tx.clone(), WatchEvent::StateChanged(SessionState::Expired)));
                events.push((
                    tx.clone(),
                    WatchEvent::StateChanged(SessionState::Reconnected),
                ));
            }
        }
        for (tx, event) in events {
            let _ = tx.send(event).await;
        }
    }

    /// 子节点变动后要通知的订阅（前缀监听语义，数据改写也算变动）
    fn child_events(state: &State, node: &str) -> Vec<(mpsc::Sender<WatchEvent>, WatchEvent)> {
        let mut events = Vec::new();
        if let Some(parent) = parent_path(node) {
            for (path, tx) in &state.child_subs {
                if *path == parent {
                    events.push((
                        tx.clone(),
                        WatchEvent::ChildrenChanged { path: path.clone() },
                    ));
                }
            }
        }
        for (path, tx) in &state.data_subs {
            if *path == node {
                events.push((tx.clone(), WatchEvent::DataChanged { path: path.clone() }));
            }
        }
        events
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordination {
    async fn exists(&self, path: &str) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.nodes.contains_key(path))
    }

    async fn create_persistent(&self, path: &str, recursive: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if recursive {
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current.push('/');
                current.push_str(segment);
                state.nodes.entry(current.clone()).or_insert(Node {
                    payload: Vec::new(),
                    ephemeral: false,
                });
            }
        } else {
            state.nodes.entry(path.to_string()).or_insert(Node {
                payload: Vec::new(),
                ephemeral: false,
            });
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        let events = {
            let mut state = self.state.lock().await;
            state.nodes.insert(
                path.to_string(),
                Node {
                    payload,
                    ephemeral: true,
                },
            );
            Self::child_events(&state, path)
        };
        for (tx, event) in events {
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    async fn write_data(&self, path: &str, payload: Vec<u8>) -> Result<()> {
        let events = {
            let mut state = self.state.lock().await;
            match state.nodes.get_mut(path) {
                Some(node) => node.payload = payload,
                None => {
                    return Err(RpcError::transport(format!("no node at {path}")));
                }
            }
            Self::child_events(&state, path)
        };
        for (tx, event) in events {
            let _ = tx.send(event).await;
        }
        Ok(())
    }

    async fn read_data(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock().await;
        Ok(state.nodes.get(path).map(|node| node.payload.clone()))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let prefix = child_prefix(path);
        let state = self.state.lock().await;
        let mut children = BTreeSet::new();
        for key in state.nodes.keys() {
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
        let (removed, events) = {
            let mut state = self.state.lock().await;
            let removed = state.nodes.remove(path).is_some();
            let events = if removed {
                Self::child_events(&state, path)
            } else {
                Vec::new()
            };
            (removed, events)
        };
        for (tx, event) in events {
            let _ = tx.send(event).await;
        }
        Ok(removed)
    }

    async fn delete_recursive(&self, path: &str) -> Result<bool> {
        let events = {
            let mut state = self.state.lock().await;
            let prefix = child_prefix(path);
            let doomed: Vec<String> = state
                .nodes
                .keys()
                .filter(|k| *k == path || k.starts_with(&prefix))
                .cloned()
                .collect();
            for key in &doomed {
                state.nodes.remove(key);
            }
            if doomed.is_empty() {
                Vec::new()
            } else {
                // 整棵子树消失：既通知父节点的子列表监听，也通知挂在
                // 被删节点自身上的子列表监听
                let mut events = Self::child_events(&state, path);
                for (sub_path, tx) in &state.child_subs {
                    if *sub_path == path {
                        events.push((
                            tx.clone(),
                            WatchEvent::ChildrenChanged {
                                path: sub_path.clone(),
                            },
                        ));
                    }
                }
                events
            }
        };
        for (tx, event) in events {
            let _ = tx.send(event).await;
        }
        Ok(true)
    }

    async fn subscribe_child_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.child_subs.push((path.to_string(), events));
        Ok(())
    }

    async fn subscribe_data_changes(
        &self,
        path: &str,
        events: mpsc::Sender<WatchEvent>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.data_subs.push((path.to_string(), events));
        Ok(())
    }

    async fn subscribe_state_changes(&self, events: mpsc::Sender<WatchEvent>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.state_subs.push(events);
        Ok(())
    }
}
