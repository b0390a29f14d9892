use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_cluster::NodeQueueDrain;
use fleet_domain::{keys, now_millis, CoordinationStore, Priority, TaskMessage};
use fleet_errors::FleetResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backoff::BackoffPolicy;

#[derive(Debug, Clone)]
pub struct DurableTaskQueueConfig {
    pub backoff: BackoffPolicy,
    pub promotion_batch: usize,
    pub reclaim_window: usize,
    /// 处理中消息从到期起超过该时长视为执行者已死亡
    pub stale_timeout: Duration,
    pub inflight_marker_ttl: Duration,
    pub recent_history: usize,
}

impl Default for DurableTaskQueueConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            promotion_batch: 50,
            reclaim_window: 100,
            stale_timeout: Duration::from_secs(30),
            inflight_marker_ttl: Duration::from_secs(300),
            recent_history: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Ready,
    Delayed,
}

/// 一次弹出的消息
///
/// `raw` 是处理中列表里的原始字符串，确认时按它精确删除。
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message: TaskMessage,
    pub raw: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub node_id: String,
    pub high: u64,
    pub normal: u64,
    pub delayed: u64,
    pub processing: u64,
    pub global_high: u64,
    pub global_normal: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionStatus {
    Success,
    Retry,
    Failed,
}

/// `task:monitor:recent` 中的一条记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub task_id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: CompletionStatus,
    pub retry_count: u32,
    pub message: Option<String>,
    pub finished_at: i64,
}

/// 可靠任务队列
pub struct DurableTaskQueue {
    store: Arc<dyn CoordinationStore>,
    local_node_id: String,
    config: DurableTaskQueueConfig,
}

impl DurableTaskQueue {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        local_node_id: impl Into<String>,
        config: DurableTaskQueueConfig,
    ) -> Self {
        Self {
            store,
            local_node_id: local_node_id.into(),
            config,
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub fn config(&self) -> &DurableTaskQueueConfig {
        &self.config
    }

    // ---- 入队与提升 ----

    pub async fn enqueue(&self, message: &TaskMessage) -> FleetResult<EnqueueOutcome> {
        self.enqueue_at(message, now_millis()).await
    }

    /// 已到期直接进入就绪列表，否则进入延迟集合
    pub async fn enqueue_at(&self, message: &TaskMessage, now: i64) -> FleetResult<EnqueueOutcome> {
        let raw = message.to_json()?;
        let node_id = &message.target_node;
        let outcome = if message.is_due(now) {
            self.store
                .list_push_front(&keys::ready_queue(node_id, message.priority), &raw)
                .await?;
            EnqueueOutcome::Ready
        } else {
            self.store
                .sorted_add(&keys::delay_queue(node_id), &raw, message.scheduled_at)
                .await?;
            EnqueueOutcome::Delayed
        };

        metrics::counter!("fleet_queue_enqueued_total", "priority" => message.priority.as_str())
            .increment(1);
        info!(
            "[QUEUE_ENQUEUE] task_id={} target={} priority={} outcome={:?} trace_id={}",
            message.task_id, node_id, message.priority, outcome, message.trace_id
        );
        Ok(outcome)
    }

    /// 把到期的延迟消息移入就绪列表
    ///
    /// 先删除再写入，删除失败说明已被其他提升者处理，跳过。
    pub async fn promote_due_at(&self, node_id: &str, now: i64) -> FleetResult<usize> {
        let delay_key = keys::delay_queue(node_id);
        let due = self
            .store
            .sorted_range_by_score(&delay_key, now, self.config.promotion_batch)
            .await?;

        let mut promoted = 0;
        for raw in due {
            if !self.store.sorted_remove(&delay_key, &raw).await? {
                continue;
            }
            match TaskMessage::from_json(&raw) {
                Ok(message) => {
                    self.store
                        .list_push_front(&keys::ready_queue(node_id, message.priority), &raw)
                        .await?;
                    promoted += 1;
                }
                Err(e) => error!("[QUEUE_PROMOTE] 丢弃无法解析的延迟消息: {} raw={}", e, raw),
            }
        }

        if promoted > 0 {
            metrics::counter!("fleet_queue_promoted_total").increment(promoted as u64);
            debug!("[QUEUE_PROMOTE] node={} 提升 {} 条到期消息", node_id, promoted);
        }
        Ok(promoted)
    }

    // ---- 消费 ----

    /// 弹出本节点的下一条消息，同时放入本节点处理中列表
    ///
    /// 顺序：本地HIGH、全局HIGH、本地NORMAL、全局NORMAL；都为空时在本地NORMAL上阻塞等待。
    pub async fn pop(&self, timeout: Duration) -> FleetResult<Option<Delivery>> {
        let processing = keys::processing_queue(&self.local_node_id);
        let sources = [
            keys::ready_queue(&self.local_node_id, Priority::High),
            keys::global_ready_queue(Priority::High),
            keys::ready_queue(&self.local_node_id, Priority::Normal),
            keys::global_ready_queue(Priority::Normal),
        ];

        for source in &sources {
            if let Some(raw) = self.store.list_move(source, &processing, None).await? {
                if let Some(delivery) = self.accept(raw).await? {
                    return Ok(Some(delivery));
                }
            }
        }

        let own_normal = &sources[2];
        match self
            .store
            .list_move(own_normal, &processing, Some(timeout))
            .await?
        {
            Some(raw) => self.accept(raw).await,
            None => Ok(None),
        }
    }

    async fn accept(&self, raw: String) -> FleetResult<Option<Delivery>> {
        let message = match TaskMessage::from_json(&raw) {
            Ok(message) => message,
            Err(e) => {
                error!("[QUEUE_POP] 丢弃无法解析的消息: {} raw={}", e, raw);
                self.store
                    .list_remove(&keys::processing_queue(&self.local_node_id), &raw)
                    .await?;
                return Ok(None);
            }
        };

        self.store
            .set(
                &keys::inflight_marker(&message.task_id),
                &self.local_node_id,
                Some(self.config.inflight_marker_ttl),
            )
            .await?;
        debug!(
            "[QUEUE_POP] task_id={} retry_count={} trace_id={}",
            message.task_id, message.retry_count, message.trace_id
        );
        Ok(Some(Delivery { message, raw }))
    }

    /// 成功确认：从处理中列表删除并清理标记
    pub async fn ack(&self, delivery: &Delivery) -> FleetResult<bool> {
        let removed = self.remove_processing(delivery).await?;
        self.clear_markers(&delivery.message.task_id).await?;
        metrics::counter!("fleet_queue_acked_total").increment(1);
        self.record_completion(&delivery.message, CompletionStatus::Success, None)
            .await;
        Ok(removed)
    }

    /// 失败重试：重新计算计划时间后放回本节点延迟集合，返回新的计划时间
    ///
    /// 如果消息已不在处理中列表（已被回收或确认），不再重复写入。
    pub async fn nack_at(
        &self,
        delivery: &Delivery,
        now: i64,
        reason: &str,
    ) -> FleetResult<Option<i64>> {
        if !self.remove_processing(delivery).await? {
            warn!(
                "[QUEUE_NACK] task_id={} 已不在处理中列表，放弃重试",
                delivery.message.task_id
            );
            return Ok(None);
        }

        let mut message = delivery.message.clone();
        let delay = self.config.backoff.delay_ms(message.retry_count) as i64;
        message.retry_count += 1;
        message.scheduled_at = now + delay;
        message.target_node = self.local_node_id.clone();

        self.store
            .sorted_add(
                &keys::delay_queue(&self.local_node_id),
                &message.to_json()?,
                message.scheduled_at,
            )
            .await?;
        self.store
            .delete(&keys::inflight_marker(&message.task_id))
            .await?;

        metrics::counter!("fleet_queue_nacked_total").increment(1);
        warn!(
            "[QUEUE_NACK] task_id={} retry_count={} 将在 {}ms 后重试: {}",
            message.task_id, message.retry_count, delay, reason
        );
        self.record_completion(&message, CompletionStatus::Retry, Some(reason))
            .await;
        Ok(Some(message.scheduled_at))
    }

    pub async fn nack(&self, delivery: &Delivery, reason: &str) -> FleetResult<Option<i64>> {
        self.nack_at(delivery, now_millis(), reason).await
    }

    /// 超过重试上限：丢弃消息
    pub async fn fail(&self, delivery: &Delivery, reason: &str) -> FleetResult<bool> {
        let removed = self.remove_processing(delivery).await?;
        self.clear_markers(&delivery.message.task_id).await?;
        metrics::counter!("fleet_queue_failed_total").increment(1);
        error!(
            "[QUEUE_FAILED] task_id={} retry_count={} 已放弃: {}",
            delivery.message.task_id, delivery.message.retry_count, reason
        );
        self.record_completion(&delivery.message, CompletionStatus::Failed, Some(reason))
            .await;
        Ok(removed)
    }

    /// 只从处理中列表删除，不改动标记（同一任务的另一条消息仍在本地执行时使用）
    pub async fn discard(&self, delivery: &Delivery) -> FleetResult<bool> {
        self.remove_processing(delivery).await
    }

    /// 从处理中列表删除并清理标记
    ///
    /// 正在执行的是触发源直接触发的副本时使用：该副本不会清理队列标记，
    /// 留下的标记会让所有节点在TTL内跳过这个任务。
    pub async fn discard_and_clear(&self, delivery: &Delivery) -> FleetResult<bool> {
        let removed = self.remove_processing(delivery).await?;
        self.clear_markers(&delivery.message.task_id).await?;
        Ok(removed)
    }

    async fn remove_processing(&self, delivery: &Delivery) -> FleetResult<bool> {
        let removed = self
            .store
            .list_remove(&keys::processing_queue(&self.local_node_id), &delivery.raw)
            .await?;
        Ok(removed > 0)
    }

    // ---- 回收 ----

    /// 扫描处理中列表尾部窗口，把超时的消息直接放回就绪列表
    ///
    /// 计划时间改写为 `now`，一个超时窗口内最多回收一次；本进程仍在执行的任务不回收。
    pub async fn reclaim_stale_at<F>(
        &self,
        node_id: &str,
        now: i64,
        is_executing: F,
    ) -> FleetResult<usize>
    where
        F: Fn(&str) -> bool + Send + Sync,
    {
        let processing = keys::processing_queue(node_id);
        let window = self.config.reclaim_window as isize;
        let entries = self.store.list_range(&processing, -window, -1).await?;
        let stale_ms = self.config.stale_timeout.as_millis() as i64;

        let mut reclaimed = 0;
        for raw in entries {
            let mut message = match TaskMessage::from_json(&raw) {
                Ok(message) => message,
                Err(e) => {
                    error!("[QUEUE_RECLAIM] 丢弃无法解析的处理中消息: {}", e);
                    self.store.list_remove(&processing, &raw).await?;
                    continue;
                }
            };
            if now - message.due_since() <= stale_ms || is_executing(&message.task_id) {
                continue;
            }
            if self.store.list_remove(&processing, &raw).await? == 0 {
                continue;
            }

            message.scheduled_at = now;
            self.store
                .list_push_front(&keys::ready_queue(node_id, message.priority), &message.to_json()?)
                .await?;
            reclaimed += 1;
            warn!(
                "[QUEUE_RECLAIM] task_id={} 处理超时，重新放回就绪列表 trace_id={}",
                message.task_id, message.trace_id
            );
        }

        if reclaimed > 0 {
            metrics::counter!("fleet_queue_reclaimed_total").increment(reclaimed as u64);
        }
        Ok(reclaimed)
    }

    // ---- 标记 ----

    /// 已分发或正在某个节点执行
    pub async fn is_task_in_flight(&self, task_id: &str) -> FleetResult<bool> {
        if self.store.exists(&keys::distributed_marker(task_id)).await? {
            return Ok(true);
        }
        self.store.exists(&keys::inflight_marker(task_id)).await
    }

    pub async fn mark_distributed(
        &self,
        task_id: &str,
        target_node: &str,
        ttl: Duration,
    ) -> FleetResult<()> {
        self.store
            .set(&keys::distributed_marker(task_id), target_node, Some(ttl))
            .await
    }

    pub async fn clear_distributed(&self, task_id: &str) -> FleetResult<()> {
        self.store.delete(&keys::distributed_marker(task_id)).await?;
        Ok(())
    }

    async fn clear_markers(&self, task_id: &str) -> FleetResult<()> {
        self.store.delete(&keys::inflight_marker(task_id)).await?;
        self.clear_distributed(task_id).await
    }

    // ---- 查询 ----

    pub async fn stats(&self, node_id: &str) -> FleetResult<QueueStats> {
        Ok(QueueStats {
            node_id: node_id.to_string(),
            high: self.store.list_len(&keys::ready_queue(node_id, Priority::High)).await?,
            normal: self
                .store
                .list_len(&keys::ready_queue(node_id, Priority::Normal))
                .await?,
            delayed: self.store.sorted_len(&keys::delay_queue(node_id)).await?,
            processing: self.store.list_len(&keys::processing_queue(node_id)).await?,
            global_high: self
                .store
                .list_len(&keys::global_ready_queue(Priority::High))
                .await?,
            global_normal: self
                .store
                .list_len(&keys::global_ready_queue(Priority::Normal))
                .await?,
        })
    }

    async fn record_completion(
        &self,
        message: &TaskMessage,
        status: CompletionStatus,
        reason: Option<&str>,
    ) {
        let record = CompletionRecord {
            task_id: message.task_id.clone(),
            execution_id: message.execution_id.clone(),
            node_id: self.local_node_id.clone(),
            status,
            retry_count: message.retry_count,
            message: reason.map(str::to_string),
            finished_at: now_millis(),
        };
        let result: FleetResult<()> = async {
            let raw = serde_json::to_string(&record)?;
            self.store
                .list_push_front(keys::RECENT_COMPLETIONS, &raw)
                .await?;
            self.store
                .list_trim(
                    keys::RECENT_COMPLETIONS,
                    0,
                    self.config.recent_history as isize - 1,
                )
                .await
        }
        .await;
        if let Err(e) = result {
            debug!("写入最近完成记录失败: {}", e);
        }
    }

    /// 最近的完成记录，最新的在前
    pub async fn recent_completions(&self, limit: usize) -> FleetResult<Vec<CompletionRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raws = self
            .store
            .list_range(keys::RECENT_COMPLETIONS, 0, limit as isize - 1)
            .await?;
        Ok(raws
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    // ---- 离线节点回收 ----

    async fn drain_list(&self, source: &str, priority: Priority) -> FleetResult<usize> {
        let destination = keys::global_ready_queue(priority);
        let mut moved = 0;
        while self
            .store
            .list_move(source, &destination, None)
            .await?
            .is_some()
        {
            moved += 1;
        }
        Ok(moved)
    }

    async fn redistribute_raw(&self, raw: &str) -> FleetResult<bool> {
        match TaskMessage::from_json(raw) {
            Ok(message) => {
                self.store
                    .list_push_front(&keys::global_ready_queue(message.priority), raw)
                    .await?;
                Ok(true)
            }
            Err(e) => {
                error!("[QUEUE_DRAIN] 丢弃无法解析的消息: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl NodeQueueDrain for DurableTaskQueue {
    /// 依次转移 high、normal、延迟、处理中四个结构，最后删除它们
    async fn drain_node(&self, node_id: &str) -> FleetResult<usize> {
        let mut drained = 0;
        for priority in Priority::drain_order() {
            drained += self
                .drain_list(&keys::ready_queue(node_id, priority), priority)
                .await?;
        }

        let delay_key = keys::delay_queue(node_id);
        loop {
            let batch = self
                .store
                .sorted_range_by_score(&delay_key, i64::MAX, self.config.promotion_batch)
                .await?;
            if batch.is_empty() {
                break;
            }
            for raw in batch {
                if self.store.sorted_remove(&delay_key, &raw).await?
                    && self.redistribute_raw(&raw).await?
                {
                    drained += 1;
                }
            }
        }

        let processing = keys::processing_queue(node_id);
        while let Some(raw) = self.store.list_pop_back(&processing).await? {
            if self.redistribute_raw(&raw).await? {
                drained += 1;
            }
        }

        for priority in Priority::drain_order() {
            self.store.delete(&keys::ready_queue(node_id, priority)).await?;
        }
        self.store.delete(&delay_key).await?;
        self.store.delete(&processing).await?;

        metrics::counter!("fleet_queue_drained_total").increment(drained as u64);
        info!("[QUEUE_DRAIN] node={} 转移 {} 条消息到全局队列", node_id, drained);
        Ok(drained)
    }
}
