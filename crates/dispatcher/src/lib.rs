//! 任务分发：本地执行还是交给负载更低的对端

pub mod distributor;
pub mod strategies;

pub use distributor::{Placement, TaskDistributor, TaskDistributorConfig};
pub use strategies::{MinMaxAvoidedStrategy, PlacementStrategy};
