//! 可靠任务队列
//!
//! 每个节点一组结构：HIGH/NORMAL 两个就绪列表、按计划时间排序的延迟集合、
//! 以及作为崩溃标记的处理中列表。一条消息任一时刻只处于其中之一。

pub mod backoff;
pub mod execution;
pub mod queue;
pub mod worker;

pub use backoff::{backoff_delay_ms, BackoffPolicy};
pub use execution::{run_job, ExecutingGuard, ExecutingTasks, ExecutionOrigin};
pub use queue::{
    CompletionRecord, CompletionStatus, Delivery, DurableTaskQueue, DurableTaskQueueConfig,
    EnqueueOutcome, QueueStats,
};
pub use worker::{QueueWorker, QueueWorkerConfig};
