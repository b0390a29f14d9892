//! Hand-written test doubles for the collaborator traits

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::{
    ExecutionContext, ExecutionLogEntry, ExecutionLogSink, ExecutionStatus, IpPolicy,
    JobInvoker, JobMetadata,
};
use fleet_errors::{FleetError, FleetResult};

/// 记录所有回调的执行日志落点
#[derive(Debug, Clone, Default)]
pub struct RecordingLogSink {
    starts: Arc<Mutex<Vec<ExecutionContext>>>,
    completions: Arc<Mutex<Vec<(ExecutionContext, ExecutionStatus)>>>,
    entries: Arc<Mutex<Vec<ExecutionLogEntry>>>,
}

impl RecordingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starts(&self) -> Vec<ExecutionContext> {
        self.starts.lock().unwrap().clone()
    }

    pub fn completions(&self) -> Vec<(ExecutionContext, ExecutionStatus)> {
        self.completions.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// 所有日志条目的状态标签，按写入顺序
    pub fn labels(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.status.label())
            .collect()
    }
}

#[async_trait]
impl ExecutionLogSink for RecordingLogSink {
    async fn record_start(&self, ctx: &ExecutionContext) {
        self.starts.lock().unwrap().push(ctx.clone());
    }

    async fn record_complete(&self, ctx: &ExecutionContext, status: &ExecutionStatus) {
        self.completions
            .lock()
            .unwrap()
            .push((ctx.clone(), status.clone()));
    }

    async fn append_log(&self, entry: ExecutionLogEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

/// 单次调用的预设结果
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(String),
    Panic(String),
    /// 睡眠后成功，用于模拟长任务
    Sleep(Duration),
}

/// 按脚本依次返回结果的任务执行体，脚本耗尽后一律成功
#[derive(Debug, Clone, Default)]
pub struct ScriptedJobInvoker {
    script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    invocations: Arc<Mutex<Vec<(String, String)>>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl ScriptedJobInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: Vec<ScriptedOutcome>) -> Self {
        let invoker = Self::default();
        invoker.script.lock().unwrap().extend(outcomes);
        invoker
    }

    pub fn push(&self, outcome: ScriptedOutcome) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// (job_key, trace_id)
    pub fn invocations(&self) -> Vec<(String, String)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobInvoker for ScriptedJobInvoker {
    async fn invoke(&self, job: &JobMetadata, ctx: &ExecutionContext) -> FleetResult<()> {
        self.invocations
            .lock()
            .unwrap()
            .push((job.job_key(), ctx.trace_id.clone()));
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Succeed);

        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        let result = match outcome {
            ScriptedOutcome::Succeed => Ok(()),
            ScriptedOutcome::Fail(message) => Err(FleetError::handler_failure(message)),
            ScriptedOutcome::Panic(message) => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("{message}");
            }
            ScriptedOutcome::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// 固定名单的IP策略
#[derive(Debug, Clone, Default)]
pub struct StaticIpPolicy {
    blacklisted: Arc<Mutex<HashSet<String>>>,
}

impl StaticIpPolicy {
    pub fn new<I, S>(ips: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blacklisted: Arc::new(Mutex::new(ips.into_iter().map(Into::into).collect())),
        }
    }

    pub fn block(&self, ip: &str) {
        self.blacklisted.lock().unwrap().insert(ip.to_string());
    }
}

#[async_trait]
impl IpPolicy for StaticIpPolicy {
    async fn is_blacklisted(&self, ip: &str) -> FleetResult<bool> {
        Ok(self.blacklisted.lock().unwrap().contains(ip))
    }
}
