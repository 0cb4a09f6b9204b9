//! 负载均衡模块
//!
//! 提供多种负载均衡策略，从动态节点列表中选出一个节点。
//! 所有策略共享同一契约：空节点列表一律返回
//! [`RpcError::EmptyNodeSet`]，绝不返回过期或空的节点。

use crate::cache::SelectionCache;
use crate::error::{Result, RpcError};
use crate::types::ServiceInfo;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

/// 负载均衡策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadBalanceStrategy {
    /// 轮询（Round Robin）
    #[default]
    RoundRobin,
    /// 随机（Random）
    Random,
    /// 加权（按 weight 字段）
    Weighted,
    /// 最少连接（按 current_connections 字段）
    LeastConnections,
    /// 一致性哈希（Consistent Hash）
    ConsistentHash,
}

impl LoadBalanceStrategy {
    /// 从配置字符串解析，未识别的值回落到轮询
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "random" => LoadBalanceStrategy::Random,
            "weighted" => LoadBalanceStrategy::Weighted,
            "least_connections" | "leastconnections" => LoadBalanceStrategy::LeastConnections,
            "consistent_hash" | "consistenthash" => LoadBalanceStrategy::ConsistentHash,
            _ => LoadBalanceStrategy::RoundRobin,
        }
    }
}

/// 负载均衡器
///
/// 每个实例持有一个策略变体与选择状态缓存；同一服务的并发选择
/// 在该服务的状态条目锁下串行，轮询的读改写不会交错。
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    cache: Arc<SelectionCache>,
}

impl LoadBalancer {
    /// 创建新的负载均衡器（自带独立的选择状态缓存）
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self::with_cache(strategy, Arc::new(SelectionCache::new()))
    }

    /// 创建共享选择状态缓存的负载均衡器
    pub fn with_cache(strategy: LoadBalanceStrategy, cache: Arc<SelectionCache>) -> Self {
        Self { strategy, cache }
    }

    /// 当前策略
    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// 选择一个服务节点
    pub async fn choose(&self, service_name: &str, nodes: &[ServiceInfo]) -> Result<ServiceInfo> {
        self.choose_with_key(service_name, nodes, None).await
    }

    /// 选择一个服务节点，`key` 为一致性哈希的路由键（缺省退化为服务名）
    pub async fn choose_with_key(
        &self,
        service_name: &str,
        nodes: &[ServiceInfo],
        key: Option<&str>,
    ) -> Result<ServiceInfo> {
        if nodes.is_empty() {
            return Err(RpcError::empty_node_set(service_name));
        }

        match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.choose_round_robin(service_name, nodes).await,
            LoadBalanceStrategy::Random => self.choose_random(service_name, nodes),
            LoadBalanceStrategy::Weighted => self.choose_weighted(service_name, nodes),
            LoadBalanceStrategy::LeastConnections => {
                self.choose_least_connections(service_name, nodes)
            }
            LoadBalanceStrategy::ConsistentHash => {
                self.choose_consistent_hash(nodes, key.unwrap_or(service_name))
            }
        }
    }

    /// 最近一次选择是否完成了对给定节点列表的一整轮轮转
    ///
    /// 只对顺序敏感的轮询策略有意义，其余策略恒为 false。
    pub async fn is_last_node(&self, service_name: &str, nodes: &[ServiceInfo]) -> bool {
        match self.strategy {
            LoadBalanceStrategy::RoundRobin => {
                if nodes.is_empty() {
                    return false;
                }
                self.cache.cursor(self.strategy, service_name).await == Some(nodes.len() - 1)
            }
            _ => false,
        }
    }

    /// 轮询选择
    ///
    /// 游标的读改写在条目锁下原子完成，存回的是取模后的有效下标，
    /// 游标永远落在当前快照的 `[0, nodes.len() - 1]` 内。
    async fn choose_round_robin(
        &self,
        service_name: &str,
        nodes: &[ServiceInfo],
    ) -> Result<ServiceInfo> {
        let entry = self.cache.entry(self.strategy, service_name).await;
        let mut state = entry.lock().await;
        let index = match state.cursor {
            Some(previous) => (previous + 1) % nodes.len(),
            None => 0,
        };
        state.cursor = Some(index);
        debug!(service = service_name, index, "round robin selected node");
        Ok(nodes[index].clone())
    }

    /// 随机选择
    fn choose_random(&self, service_name: &str, nodes: &[ServiceInfo]) -> Result<ServiceInfo> {
        let index = rand::thread_rng().gen_range(0..nodes.len());
        nodes
            .get(index)
            .cloned()
            .ok_or_else(|| RpcError::empty_node_set(service_name))
    }

    /// 加权选择
    ///
    /// 权重非正的节点不参与抽取；若所有节点权重均非正，退化为均匀随机。
    fn choose_weighted(&self, service_name: &str, nodes: &[ServiceInfo]) -> Result<ServiceInfo> {
        let total: f32 = nodes.iter().filter(|n| n.weight > 0.0).map(|n| n.weight).sum();
        if total <= 0.0 {
            return self.choose_random(service_name, nodes);
        }

        let mut point = rand::thread_rng().gen_range(0.0..total);
        for node in nodes {
            if node.weight <= 0.0 {
                continue;
            }
            if point < node.weight {
                return Ok(node.clone());
            }
            point -= node.weight;
        }
        // 浮点累加的边界落点归给最后一个参与抽取的节点
        nodes
            .iter()
            .rev()
            .find(|n| n.weight > 0.0)
            .cloned()
            .ok_or_else(|| RpcError::empty_node_set(service_name))
    }

    /// 最少连接选择
    fn choose_least_connections(
        &self,
        service_name: &str,
        nodes: &[ServiceInfo],
    ) -> Result<ServiceInfo> {
        nodes
            .iter()
            .min_by_key(|n| n.current_connections)
            .cloned()
            .ok_or_else(|| RpcError::empty_node_set(service_name))
    }

    /// 一致性哈希选择
    fn choose_consistent_hash(&self, nodes: &[ServiceInfo], key: &str) -> Result<ServiceInfo> {
        use std::collections::hash_map::DefaultHasher;

        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish();
        let index = (hash as usize) % nodes.len();
        Ok(nodes[index].clone())
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::RoundRobin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_nodes(hosts: &[&str]) -> Vec<ServiceInfo> {
        hosts
            .iter()
            .map(|h| ServiceInfo::new("test-service", *h).with_port(8080))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_visits_each_node_once_per_rotation() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = make_nodes(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        let mut visited = Vec::new();
        for i in 0..nodes.len() {
            let chosen = balancer.choose("test-service", &nodes).await.unwrap();
            visited.push(chosen.host.clone());
            let last = balancer.is_last_node("test-service", &nodes).await;
            assert_eq!(last, i == nodes.len() - 1);
        }

        assert_eq!(visited, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_round_robin_cursor_wraps_around() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = make_nodes(&["10.0.0.1", "10.0.0.2"]);

        let mut hosts = Vec::new();
        for _ in 0..5 {
            hosts.push(balancer.choose("test-service", &nodes).await.unwrap().host);
        }
        assert_eq!(
            hosts,
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.1", "10.0.0.2", "10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_round_robin_under_concurrency_distributes_evenly() {
        let balancer = Arc::new(LoadBalancer::new(LoadBalanceStrategy::RoundRobin));
        let nodes = Arc::new(make_nodes(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let balancer = balancer.clone();
            let nodes = nodes.clone();
            handles.push(tokio::spawn(async move {
                balancer.choose("test-service", &nodes).await.unwrap().host
            }));
        }

        let mut counts = std::collections::HashMap::new();
        for handle in handles {
            let host = handle.await.unwrap();
            *counts.entry(host).or_insert(0usize) += 1;
        }

        // 游标在锁下递增取模，40 次选择在 4 个节点上严格均分
        assert_eq!(counts.values().sum::<usize>(), 40);
        for node in nodes.iter() {
            assert_eq!(counts.get(&node.host), Some(&10));
        }
    }

    #[tokio::test]
    async fn test_round_robin_state_is_per_service() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::RoundRobin);
        let nodes = make_nodes(&["10.0.0.1", "10.0.0.2"]);

        assert_eq!(balancer.choose("a", &nodes).await.unwrap().host, "10.0.0.1");
        assert_eq!(balancer.choose("a", &nodes).await.unwrap().host, "10.0.0.2");
        // 另一服务的游标独立，从头开始
        assert_eq!(balancer.choose("b", &nodes).await.unwrap().host, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_empty_node_set_for_every_strategy() {
        for strategy in [
            LoadBalanceStrategy::RoundRobin,
            LoadBalanceStrategy::Random,
            LoadBalanceStrategy::Weighted,
            LoadBalanceStrategy::LeastConnections,
            LoadBalanceStrategy::ConsistentHash,
        ] {
            let balancer = LoadBalancer::new(strategy);
            let err = balancer.choose("test-service", &[]).await.unwrap_err();
            assert!(err.is_empty_node_set(), "strategy {strategy:?}");
        }
    }

    #[tokio::test]
    async fn test_weighted_excludes_non_positive_weights() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::Weighted);
        let nodes = vec![
            ServiceInfo::new("svc", "10.0.0.1").with_weight(0.0),
            ServiceInfo::new("svc", "10.0.0.2").with_weight(2.0),
            ServiceInfo::new("svc", "10.0.0.3").with_weight(-1.0),
        ];

        for _ in 0..50 {
            let chosen = balancer.choose("svc", &nodes).await.unwrap();
            assert_eq!(chosen.host, "10.0.0.2");
        }
    }

    #[tokio::test]
    async fn test_weighted_falls_back_to_uniform_when_all_non_positive() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::Weighted);
        let nodes = vec![
            ServiceInfo::new("svc", "10.0.0.1").with_weight(0.0),
            ServiceInfo::new("svc", "10.0.0.2").with_weight(-3.0),
        ];

        for _ in 0..20 {
            let chosen = balancer.choose("svc", &nodes).await.unwrap();
            assert!(nodes.iter().any(|n| n.host == chosen.host));
        }
    }

    #[tokio::test]
    async fn test_least_connections_picks_minimum() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::LeastConnections);
        let nodes = vec![
            ServiceInfo::new("svc", "10.0.0.1").with_current_connections(5),
            ServiceInfo::new("svc", "10.0.0.2").with_current_connections(1),
            ServiceInfo::new("svc", "10.0.0.3").with_current_connections(9),
        ];

        let chosen = balancer.choose("svc", &nodes).await.unwrap();
        assert_eq!(chosen.host, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_consistent_hash_is_stable_for_same_key() {
        let balancer = LoadBalancer::new(LoadBalanceStrategy::ConsistentHash);
        let nodes = make_nodes(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        let first = balancer
            .choose_with_key("svc", &nodes, Some("user-42"))
            .await
            .unwrap();
        for _ in 0..10 {
            let again = balancer
                .choose_with_key("svc", &nodes, Some("user-42"))
                .await
                .unwrap();
            assert_eq!(again.host, first.host);
        }
    }

    #[tokio::test]
    async fn test_is_last_node_false_for_order_independent_strategies() {
        let nodes = make_nodes(&["10.0.0.1", "10.0.0.2"]);
        for strategy in [
            LoadBalanceStrategy::Random,
            LoadBalanceStrategy::Weighted,
            LoadBalanceStrategy::LeastConnections,
            LoadBalanceStrategy::ConsistentHash,
        ] {
            let balancer = LoadBalancer::new(strategy);
            balancer.choose("svc", &nodes).await.unwrap();
            assert!(!balancer.is_last_node("svc", &nodes).await);
        }
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(LoadBalanceStrategy::parse("random"), LoadBalanceStrategy::Random);
        assert_eq!(LoadBalanceStrategy::parse("Weighted"), LoadBalanceStrategy::Weighted);
        assert_eq!(
            LoadBalanceStrategy::parse("least_connections"),
            LoadBalanceStrategy::LeastConnections
        );
        assert_eq!(
            LoadBalanceStrategy::parse("consistent_hash"),
            LoadBalanceStrategy::ConsistentHash
        );
        assert_eq!(LoadBalanceStrategy::parse("unknown"), LoadBalanceStrategy::RoundRobin);
    }
}
