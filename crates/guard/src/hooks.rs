use async_trait::async_trait;
use fleet_domain::{ExecutionContext, JobMetadata};

/// 触发前钩子，返回 `false` 否决本次触发
#[async_trait]
pub trait PreHook: Send + Sync {
    async fn before_fire(&self, ctx: &ExecutionContext, job: &JobMetadata) -> bool;
}
