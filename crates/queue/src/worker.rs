use std::sync::Arc;
use std::time::Duration;

use fleet_cluster::PoolUsage;
use fleet_domain::{
    now_millis, ExecutionContext, ExecutionLogEntry, ExecutionLogSink, ExecutionStatus,
    JobInvoker, JobMetadata,
};
use fleet_errors::{FleetError, FleetResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::execution::{run_job, ExecutingTasks, ExecutionOrigin};
use crate::queue::{Delivery, DurableTaskQueue};

#[derive(Debug, Clone)]
pub struct QueueWorkerConfig {
    pub consumer_count: usize,
    pub pop_timeout: Duration,
    pub promotion_interval: Duration,
    pub reclaim_interval: Duration,
    /// 弹出失败（通常是存储不可达）后的等待时间
    pub error_backoff: Duration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            consumer_count: 4,
            pop_timeout: Duration::from_secs(2),
            promotion_interval: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// 队列消费者池以及提升、回收两个后台任务
pub struct QueueWorker {
    queue: Arc<DurableTaskQueue>,
    invoker: Arc<dyn JobInvoker>,
    sink: Arc<dyn ExecutionLogSink>,
    usage: Arc<PoolUsage>,
    executing: Arc<ExecutingTasks>,
    config: QueueWorkerConfig,
}

impl QueueWorker {
    pub fn new(
        queue: Arc<DurableTaskQueue>,
        invoker: Arc<dyn JobInvoker>,
        sink: Arc<dyn ExecutionLogSink>,
        usage: Arc<PoolUsage>,
        config: QueueWorkerConfig,
    ) -> Self {
        Self {
            queue,
            invoker,
            sink,
            usage,
            executing: ExecutingTasks::new(),
            config,
        }
    }

    pub fn executing(&self) -> &Arc<ExecutingTasks> {
        &self.executing
    }

    /// 弹出并处理一条消息，返回是否处理了消息
    pub async fn poll_once(&self) -> FleetResult<bool> {
        match self.queue.pop(self.config.pop_timeout).await? {
            Some(delivery) => {
                self.process(delivery).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 处理失败只会走重试或放弃路径，不会向外传播
    pub async fn process(&self, delivery: Delivery) {
        let message = &delivery.message;
        let Some(_running) = self
            .executing
            .try_enter_as(&message.task_id, ExecutionOrigin::Delivery)
        else {
            let origin = self.executing.origin_of(&message.task_id);
            info!(
                "[QUEUE_DUPLICATE] task_id={} 已在本地执行({:?})，丢弃重复消息",
                message.task_id, origin
            );
            let result = match origin {
                Some(ExecutionOrigin::Delivery) => self.queue.discard(&delivery).await,
                _ => self.queue.discard_and_clear(&delivery).await,
            };
            if let Err(e) = result {
                warn!("丢弃重复消息失败 task_id={}: {}", message.task_id, e);
            }
            return;
        };
        let _slot = self.usage.acquire();

        let ctx = ExecutionContext::new(
            message.trace_id.clone(),
            message.task_id.clone(),
            self.queue.local_node_id(),
        );
        let span = info_span!("consume", trace_id = %ctx.trace_id, task_id = %message.task_id);
        self.execute(&delivery, &ctx).instrument(span).await;
    }

    async fn execute(&self, delivery: &Delivery, ctx: &ExecutionContext) {
        let message = &delivery.message;
        let job = match JobMetadata::from_payload(&message.job_payload) {
            Ok(job) => job,
            Err(e) => {
                let reason = format!("任务元数据无法解析: {e}");
                if let Err(e) = self.queue.fail(delivery, &reason).await {
                    error!("放弃消息失败 task_id={}: {}", message.task_id, e);
                }
                let status = ExecutionStatus::Failed { error: reason };
                self.sink
                    .append_log(ExecutionLogEntry::finished(ctx, status))
                    .await;
                return;
            }
        };

        self.sink.record_start(ctx).await;
        let result = run_job(self.invoker.as_ref(), &job, ctx).await;
        let (status, log_message) = match result {
            Ok(()) => {
                if let Err(e) = self.queue.ack(delivery).await {
                    error!("确认消息失败 task_id={}: {}", message.task_id, e);
                }
                (ExecutionStatus::Succeeded, None)
            }
            Err(e) if Self::is_terminal(&e, &job, message.retry_count) => {
                let terminal = match e {
                    terminal @ FleetError::TerminalHandlerFailure { .. } => terminal,
                    other => FleetError::TerminalHandlerFailure {
                        retry_count: message.retry_count,
                        message: other.to_string(),
                    },
                };
                let reason = terminal.to_string();
                if let Err(e) = self.queue.fail(delivery, &reason).await {
                    error!("放弃消息失败 task_id={}: {}", message.task_id, e);
                }
                (ExecutionStatus::Failed { error: reason }, None)
            }
            Err(e) => {
                let reason = e.to_string();
                let retry_note = match self.queue.nack_at(delivery, now_millis(), &reason).await {
                    Ok(Some(next)) => Some(format!("第 {} 次重试计划于 {}", message.retry_count + 1, next)),
                    Ok(None) => None,
                    Err(e) => {
                        error!("重试入队失败 task_id={}: {}", message.task_id, e);
                        None
                    }
                };
                (ExecutionStatus::Failed { error: reason }, retry_note)
            }
        };

        debug!("[QUEUE_DONE] task_id={} status={}", message.task_id, status.label());
        self.sink.record_complete(ctx, &status).await;
        let mut entry = ExecutionLogEntry::finished(ctx, status);
        if let Some(note) = log_message {
            entry = entry.with_message(note);
        }
        self.sink.append_log(entry).await;
    }

    fn is_terminal(error: &FleetError, job: &JobMetadata, retry_count: u32) -> bool {
        matches!(error, FleetError::TerminalHandlerFailure { .. }) || job.retries_exhausted(retry_count)
    }

    pub async fn promote_once(&self) -> FleetResult<usize> {
        self.queue
            .promote_due_at(self.queue.local_node_id(), now_millis())
            .await
    }

    pub async fn reclaim_once(&self) -> FleetResult<usize> {
        let executing = Arc::clone(&self.executing);
        self.queue
            .reclaim_stale_at(self.queue.local_node_id(), now_millis(), move |task_id| {
                executing.contains(task_id)
            })
            .await
    }

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.consumer_count + 2);

        for index in 0..self.config.consumer_count {
            let worker = Arc::clone(&self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            info!("消费者 {} 退出", index);
                            break;
                        }
                        popped = worker.queue.pop(worker.config.pop_timeout) => match popped {
                            Ok(Some(delivery)) => worker.process(delivery).await,
                            Ok(None) => {}
                            Err(e) => {
                                warn!("[QUEUE_POP] 消费者 {} 弹出失败: {}", index, e);
                                tokio::time::sleep(worker.config.error_backoff).await;
                            }
                        }
                    }
                }
            }));
        }

        let promoter = Arc::clone(&self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(promoter.config.promotion_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = promoter.promote_once().await {
                            warn!("[QUEUE_PROMOTE] 提升失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));

        let reclaimer = Arc::clone(&self);
        let mut shutdown_rx = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(reclaimer.config.reclaim_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = reclaimer.reclaim_once().await {
                            warn!("[QUEUE_RECLAIM] 回收失败: {}", e);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));

        handles
    }
}
