use std::process::Stdio;

use async_trait::async_trait;
use fleet_domain::{ExecutionContext, JobInvoker, JobMetadata};
use fleet_errors::{FleetError, FleetResult};
use tokio::process::Command;
use tracing::debug;

/// 输出截断长度
const OUTPUT_TAIL: usize = 512;

/// 用 `sh -c` 执行任务的 `invoke_target`
///
/// 超时由调用方控制，超时后future被丢弃，子进程随之被杀掉。
#[derive(Debug, Clone)]
pub struct ShellJobInvoker {
    shell: String,
}

impl ShellJobInvoker {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellJobInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobInvoker for ShellJobInvoker {
    async fn invoke(&self, job: &JobMetadata, ctx: &ExecutionContext) -> FleetResult<()> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&job.invoke_target)
            .env("FLEET_TRACE_ID", &ctx.trace_id)
            .env("FLEET_JOB_KEY", &ctx.job_key)
            .env("FLEET_NODE_ID", &ctx.node_id)
            .env("FLEET_JOB_PARAMS", job.params.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| FleetError::handler_failure(format!("启动命令失败: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("job_key={} 输出: {}", ctx.job_key, tail(&stdout));

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(FleetError::handler_failure(format!(
                "命令退出码 {}: {}",
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |code| code.to_string()),
                tail(&stderr)
            )))
        }
    }
}

fn tail(text: &str) -> &str {
    let text = text.trim_end();
    if text.len() <= OUTPUT_TAIL {
        return text;
    }
    let mut start = text.len() - OUTPUT_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn job(target: &str) -> JobMetadata {
        JobMetadata::new(1, "shell", target)
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("trace-shell", "1.shell", "10.0.0.1:n")
    }

    #[tokio::test]
    async fn test_successful_command() {
        let invoker = ShellJobInvoker::new();
        assert!(invoker.invoke(&job("exit 0"), &ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_stderr() {
        let invoker = ShellJobInvoker::new();
        let err = invoker
            .invoke(&job("echo broken >&2; exit 3"), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("退出码 3"));
        assert!(message.contains("broken"));
    }

    #[tokio::test]
    async fn test_context_is_exported_to_environment() {
        let invoker = ShellJobInvoker::new();
        let result = invoker
            .invoke(&job("test \"$FLEET_TRACE_ID\" = trace-shell"), &ctx())
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let long = "数".repeat(400);
        let tailed = tail(&long);
        assert!(tailed.len() <= OUTPUT_TAIL);
        assert!(tailed.chars().all(|c| c == '数'));
    }
}
