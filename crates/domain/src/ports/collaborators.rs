use async_trait::async_trait;
use fleet_errors::FleetResult;

use crate::entities::{ExecutionContext, ExecutionLogEntry, ExecutionStatus, JobMetadata};

/// IP黑名单策略
#[async_trait]
pub trait IpPolicy: Send + Sync {
    async fn is_blacklisted(&self, ip: &str) -> FleetResult<bool>;
}

/// 宿主应用提供的任务执行体
#[async_trait]
pub trait JobInvoker: Send + Sync {
    async fn invoke(&self, job: &JobMetadata, ctx: &ExecutionContext) -> FleetResult<()>;
}

/// 执行日志与监控落点
///
/// 开始时间通过 `ExecutionContext` 显式传入完成回调。
#[async_trait]
pub trait ExecutionLogSink: Send + Sync {
    async fn record_start(&self, ctx: &ExecutionContext);

    async fn record_complete(&self, ctx: &ExecutionContext, status: &ExecutionStatus);

    async fn append_log(&self, entry: ExecutionLogEntry);
}
