use async_trait::async_trait;
use fleet_domain::{ExecutionContext, ExecutionLogEntry, ExecutionLogSink, ExecutionStatus};
use tracing::{info, warn};

/// 把执行日志写成结构化日志事件
#[derive(Debug, Default, Clone)]
pub struct TracingLogSink;

impl TracingLogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionLogSink for TracingLogSink {
    async fn record_start(&self, ctx: &ExecutionContext) {
        info!(
            target: "fleet::execution",
            trace_id = %ctx.trace_id,
            job_key = %ctx.job_key,
            node_id = %ctx.node_id,
            "[EXEC_START]"
        );
    }

    async fn record_complete(&self, ctx: &ExecutionContext, status: &ExecutionStatus) {
        metrics::counter!("fleet_executions_total", "status" => status.label()).increment(1);
        info!(
            target: "fleet::execution",
            trace_id = %ctx.trace_id,
            job_key = %ctx.job_key,
            status = status.label(),
            "[EXEC_COMPLETE]"
        );
    }

    async fn append_log(&self, entry: ExecutionLogEntry) {
        match serde_json::to_string(&entry) {
            Ok(json) => info!(target: "fleet::execution", entry = %json, "[EXEC_LOG]"),
            Err(e) => warn!("执行日志序列化失败: {}", e),
        }
    }
}
