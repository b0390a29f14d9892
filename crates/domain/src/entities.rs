use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fleet_errors::FleetResult;

use crate::value_objects::{LoadMetric, Priority};

/// 当前时间（毫秒时间戳）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 生成新的追踪ID
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 任务元数据，由触发源提供，对队列层不透明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    pub job_id: i64,
    pub job_name: String,
    pub job_group: String,
    /// 调用目标，由宿主应用解释（例如shell命令）
    pub invoke_target: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    /// 调用方自定义的重试上限，队列层本身不设上限
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl JobMetadata {
    pub fn new(job_id: i64, job_name: impl Into<String>, invoke_target: impl Into<String>) -> Self {
        Self {
            job_id,
            job_name: job_name.into(),
            job_group: "DEFAULT".to_string(),
            invoke_target: invoke_target.into(),
            params: serde_json::Value::Null,
            priority: Priority::Normal,
            max_retries: None,
            timeout_seconds: None,
        }
    }

    /// 跨节点一致的任务标识 `<jobId>.<jobName>`
    pub fn job_key(&self) -> String {
        format!("{}.{}", self.job_id, self.job_name)
    }

    pub fn to_payload(&self) -> FleetResult<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_payload(payload: &serde_json::Value) -> FleetResult<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// 是否已经达到重试上限
    pub fn retries_exhausted(&self, retry_count: u32) -> bool {
        self.max_retries.is_some_and(|max| retry_count >= max)
    }
}

/// 一次触发
#[derive(Debug, Clone)]
pub struct FireEvent {
    pub job_key: String,
    pub job: JobMetadata,
    /// 计划触发时间（毫秒），同一次触发在所有节点上取值一致
    pub fire_time: i64,
}

impl FireEvent {
    pub fn new(job: JobMetadata) -> Self {
        let now = now_millis();
        Self {
            job_key: job.job_key(),
            job,
            fire_time: now - now.rem_euclid(1000),
        }
    }

    pub fn with_fire_time(mut self, fire_time: i64) -> Self {
        self.fire_time = fire_time;
        self
    }

    /// 单次触发锁使用的资源名
    pub fn fire_resource(&self) -> String {
        format!("fire:{}:{}", self.job_key, self.fire_time)
    }
}

/// 队列中传递的任务消息
///
/// 除 `retry_count` / `scheduled_at` 在重试时改写外，其余字段不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub task_id: String,
    pub execution_id: String,
    pub target_node: String,
    pub job_payload: serde_json::Value,
    pub priority: Priority,
    pub retry_count: u32,
    pub scheduled_at: i64,
    pub enqueued_at: i64,
    pub trace_id: String,
}

impl TaskMessage {
    pub fn new(
        task_id: impl Into<String>,
        target_node: impl Into<String>,
        job_payload: serde_json::Value,
        priority: Priority,
        trace_id: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            task_id: task_id.into(),
            execution_id: Uuid::new_v4().to_string(),
            target_node: target_node.into(),
            job_payload,
            priority,
            retry_count: 0,
            scheduled_at: now,
            enqueued_at: now,
            trace_id: trace_id.into(),
        }
    }

    pub fn scheduled_at(mut self, scheduled_at: i64) -> Self {
        self.scheduled_at = scheduled_at;
        self
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.scheduled_at <= now
    }

    /// 消息开始可被消费的时间点，用于判断处理中消息是否超时
    pub fn due_since(&self) -> i64 {
        self.enqueued_at.max(self.scheduled_at)
    }

    pub fn to_json(&self) -> FleetResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> FleetResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// 集群成员记录
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub node_id: String,
    pub heartbeat_at: Option<i64>,
    pub load_metric: LoadMetric,
}

impl NodeRecord {
    /// 心跳缺失或超过阈值即视为离线
    pub fn is_stale(&self, now: i64, offline_threshold_ms: i64) -> bool {
        match self.heartbeat_at {
            Some(at) => now - at > offline_threshold_ms,
            None => true,
        }
    }
}

/// 单次执行的显式上下文，替代线程级隐式状态
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trace_id: String,
    pub job_key: String,
    pub node_id: String,
    pub started_at: i64,
}

impl ExecutionContext {
    pub fn new(trace_id: impl Into<String>, job_key: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            job_key: job_key.into(),
            node_id: node_id.into(),
            started_at: now_millis(),
        }
    }

    pub fn elapsed_ms(&self, now: i64) -> i64 {
        (now - self.started_at).max(0)
    }
}

/// 跳过执行的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// 已在队列处理中（其他节点正在执行或已分发）
    QueueProcessing,
    /// 单次触发锁被其他节点持有
    LockContention,
    /// 本进程内同一任务正在执行
    AlreadyExecuting,
    /// 已分发到其他节点
    DispatchedElsewhere { target_node: String },
    Blacklisted,
    NotMaster,
    /// 前置钩子否决
    Vetoed,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::QueueProcessing => "queue-processing",
            SkipReason::LockContention => "lock-contention",
            SkipReason::AlreadyExecuting => "already-executing",
            SkipReason::DispatchedElsewhere { .. } => "dispatched-elsewhere",
            SkipReason::Blacklisted => "blacklisted",
            SkipReason::NotMaster => "not-master",
            SkipReason::Vetoed => "vetoed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "status")]
pub enum ExecutionStatus {
    Succeeded,
    Failed { error: String },
    Skipped { reason: SkipReason },
}

impl ExecutionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Succeeded => "succeeded",
            ExecutionStatus::Failed { .. } => "failed",
            ExecutionStatus::Skipped { reason } => reason.as_str(),
        }
    }
}

/// 执行日志条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub trace_id: String,
    pub job_key: String,
    pub node_id: String,
    pub status: ExecutionStatus,
    pub message: Option<String>,
    pub started_at: Option<i64>,
    pub finished_at: i64,
}

impl ExecutionLogEntry {
    pub fn skipped(ctx: &ExecutionContext, reason: SkipReason) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            job_key: ctx.job_key.clone(),
            node_id: ctx.node_id.clone(),
            status: ExecutionStatus::Skipped { reason },
            message: None,
            started_at: None,
            finished_at: now_millis(),
        }
    }

    pub fn finished(ctx: &ExecutionContext, status: ExecutionStatus) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            job_key: ctx.job_key.clone(),
            node_id: ctx.node_id.clone(),
            status,
            message: None,
            started_at: Some(ctx.started_at),
            finished_at: now_millis(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
