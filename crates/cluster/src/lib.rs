//! 集群成员、主节点选举与负载
//!
//! - [`NodeRegistry`]：注册与心跳
//! - [`NodeMonitor`]：离线检测、驱逐与队列回收
//! - [`SchedulerManager`]：租约选举、任务亲和性、负载上报与命名锁

pub mod identity;
pub mod ip_policy;
pub mod manager;
pub mod monitor;
pub mod pool;
pub mod registry;

pub use identity::NodeIdentity;
pub use ip_policy::{AllowAllIpPolicy, StoreIpPolicy};
pub use manager::{ElectionOutcome, LockHandle, SchedulerManager, SchedulerManagerConfig};
pub use monitor::{NodeMonitor, NodeMonitorConfig, NodeQueueDrain};
pub use pool::{PoolSlot, PoolUsage};
pub use registry::{NodeRegistry, NodeRegistryConfig};
