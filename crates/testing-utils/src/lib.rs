//! # Fleet Testing Utils
//!
//! 协调层各crate共享的测试工具：
//!
//! - **Builders**: `JobMetadata` / `TaskMessage` 测试数据构造
//! - **Mocks**: 记录型执行日志、按脚本返回结果的任务执行体、静态IP策略
//! - **Containers**: 基于testcontainers的Redis实例
//! - **Helpers**: 直接往存储里写节点心跳等准备动作
//!
//! ```toml
//! [dev-dependencies]
//! fleet-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod containers;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use containers::*;
pub use helpers::*;
pub use mocks::*;
