//! Test data builders

use fleet_domain::{now_millis, JobMetadata, Priority, TaskMessage};
use serde_json::Value;

pub struct JobMetadataBuilder {
    job: JobMetadata,
}

impl JobMetadataBuilder {
    pub fn new() -> Self {
        Self {
            job: JobMetadata::new(1, "test-job", "echo test"),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.job.job_id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.job.job_name = name.to_string();
        self
    }

    pub fn with_invoke_target(mut self, target: &str) -> Self {
        self.job.invoke_target = target.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.job.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.job.max_retries = Some(max_retries);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.job.params = params;
        self
    }

    pub fn build(self) -> JobMetadata {
        self.job
    }
}

impl Default for JobMetadataBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TaskMessageBuilder {
    message: TaskMessage,
}

impl TaskMessageBuilder {
    pub fn new(task_id: &str) -> Self {
        Self {
            message: TaskMessage::new(
                task_id,
                "node-1",
                Value::Null,
                Priority::Normal,
                format!("trace-{task_id}"),
            ),
        }
    }

    pub fn for_job(job: &JobMetadata) -> Self {
        let mut builder = Self::new(&job.job_key());
        builder.message.priority = job.priority;
        builder.message.job_payload = serde_json::to_value(job).unwrap_or(Value::Null);
        builder
    }

    pub fn with_target(mut self, node_id: &str) -> Self {
        self.message.target_node = node_id.to_string();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.message.priority = priority;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.message.retry_count = retry_count;
        self
    }

    pub fn scheduled_at(mut self, scheduled_at: i64) -> Self {
        self.message.scheduled_at = scheduled_at;
        self
    }

    pub fn enqueued_at(mut self, enqueued_at: i64) -> Self {
        self.message.enqueued_at = enqueued_at;
        self
    }

    /// 相对当前时间延迟执行
    pub fn delayed_by_ms(mut self, delay_ms: i64) -> Self {
        self.message.scheduled_at = now_millis() + delay_ms;
        self
    }

    pub fn build(self) -> TaskMessage {
        self.message
    }
}
