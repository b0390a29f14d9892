use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_domain::{now_millis, ExecutionContext, JobInvoker, JobMetadata};
use fleet_errors::{FleetError, FleetResult};
use futures::FutureExt;

/// 执行任务体：捕获panic，按 `timeout_seconds` 限时
pub async fn run_job(
    invoker: &dyn JobInvoker,
    job: &JobMetadata,
    ctx: &ExecutionContext,
) -> FleetResult<()> {
    let invocation = AssertUnwindSafe(invoker.invoke(job, ctx)).catch_unwind();
    let outcome = match job.timeout_seconds {
        Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), invocation)
            .await
            .map_err(|_| FleetError::handler_failure(format!("执行超时({seconds}s)")))?,
        None => invocation.await,
    };

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<String>()
                .cloned()
                .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(FleetError::handler_failure(format!("任务panic: {message}")))
        }
    }
}

/// 执行来源：触发源直接触发，或者消费队列消息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOrigin {
    Fire,
    Delivery,
}

#[derive(Debug, Clone, Copy)]
struct RunningEntry {
    started_at: i64,
    origin: ExecutionOrigin,
}

/// 本进程内正在执行的键 → 开始时间与来源
#[derive(Debug, Default)]
pub struct ExecutingTasks {
    running: Mutex<HashMap<String, RunningEntry>>,
}

impl ExecutingTasks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 以触发来源进入，已在执行时返回 `None`
    pub fn try_enter(self: &Arc<Self>, key: &str) -> Option<ExecutingGuard> {
        self.try_enter_as(key, ExecutionOrigin::Fire)
    }

    pub fn try_enter_as(self: &Arc<Self>, key: &str, origin: ExecutionOrigin) -> Option<ExecutingGuard> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.contains_key(key) {
            return None;
        }
        running.insert(
            key.to_string(),
            RunningEntry {
                started_at: now_millis(),
                origin,
            },
        );
        Some(ExecutingGuard {
            tasks: Arc::clone(self),
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn started_at(&self, key: &str) -> Option<i64> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| entry.started_at)
    }

    /// 正在执行时返回其来源
    pub fn origin_of(&self, key: &str) -> Option<ExecutionOrigin> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|entry| entry.origin)
    }

    pub fn len(&self) -> usize {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 离开作用域时移除执行标记，包括panic展开路径
#[derive(Debug)]
pub struct ExecutingGuard {
    tasks: Arc<ExecutingTasks>,
    key: String,
}

impl Drop for ExecutingGuard {
    fn drop(&mut self) {
        self.tasks
            .running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}
