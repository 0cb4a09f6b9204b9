//! 服务注册发现模块
//!
//! 注册器对抽象的协调服务契约编程，etcd 实现随附；
//! 成员变更经单任务事件循环汇入本地节点快照。

pub mod coordination;
pub mod etcd;
pub mod service_registry;
pub mod watcher;

pub use coordination::{CoordinationClient, SessionState, WatchEvent};
pub use etcd::EtcdCoordination;
pub use service_registry::{SERVICE_ROOT, ServiceRegistry, node_path, service_path};
pub use watcher::MembershipWatcher;
