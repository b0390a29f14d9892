use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_cluster::{LockHandle, NodeIdentity, SchedulerManager};
use fleet_domain::{ExecutionContext, IpPolicy, JobMetadata, NodeRecord, TaskMessage};
use fleet_errors::FleetResult;
use fleet_queue::DurableTaskQueue;
use tracing::{debug, info, warn};

use crate::strategies::PlacementStrategy;

#[derive(Debug, Clone)]
pub struct TaskDistributorConfig {
    pub load_threshold: f64,
    pub distributed_marker_ttl: Duration,
    pub lock_ttl: Duration,
}

impl Default for TaskDistributorConfig {
    fn default() -> Self {
        Self {
            load_threshold: 0.8,
            distributed_marker_ttl: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(60),
        }
    }
}

/// 一次触发的放置结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// 本地执行，已持有任务锁
    Local,
    /// 已交给对端
    Delegated { target_node: String },
    /// 已分发或正在某个节点处理
    InFlight,
    Blacklisted,
    /// 任务锁被其他节点持有或抢锁失败
    Contended,
}

impl Placement {
    pub fn executes_locally(&self) -> bool {
        matches!(self, Placement::Local)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Placement::Local => "local",
            Placement::Delegated { .. } => "delegated",
            Placement::InFlight => "in-flight",
            Placement::Blacklisted => "blacklisted",
            Placement::Contended => "contended",
        }
    }
}

/// 任务分发器
pub struct TaskDistributor {
    manager: Arc<SchedulerManager>,
    queue: Arc<DurableTaskQueue>,
    ip_policy: Arc<dyn IpPolicy>,
    strategy: Arc<dyn PlacementStrategy>,
    held_locks: Mutex<HashMap<String, LockHandle>>,
    config: TaskDistributorConfig,
}

impl TaskDistributor {
    pub fn new(
        manager: Arc<SchedulerManager>,
        queue: Arc<DurableTaskQueue>,
        ip_policy: Arc<dyn IpPolicy>,
        strategy: Arc<dyn PlacementStrategy>,
        config: TaskDistributorConfig,
    ) -> Self {
        Self {
            manager,
            queue,
            ip_policy,
            strategy,
            held_locks: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub async fn should_execute_locally(
        &self,
        task_id: &str,
        job: &JobMetadata,
        ctx: &ExecutionContext,
    ) -> bool {
        self.decide(task_id, job, ctx).await.executes_locally()
    }

    /// 每次触发调用一次；任何意外错误都按本地执行处理，宁可执行也不丢弃
    pub async fn decide(&self, task_id: &str, job: &JobMetadata, ctx: &ExecutionContext) -> Placement {
        let placement = match self.try_decide(task_id, job, ctx).await {
            Ok(placement) => placement,
            Err(e) => {
                warn!(
                    "[DIST_DECISION] task_id={} 分发决策失败，默认本地执行: {}",
                    task_id, e
                );
                Placement::Local
            }
        };
        metrics::counter!("fleet_dispatch_decisions_total", "placement" => placement.label())
            .increment(1);
        info!(
            "[DIST_DECISION] task_id={} placement={:?} trace_id={}",
            task_id, placement, ctx.trace_id
        );
        placement
    }

    async fn try_decide(
        &self,
        task_id: &str,
        job: &JobMetadata,
        ctx: &ExecutionContext,
    ) -> FleetResult<Placement> {
        if self.queue.is_task_in_flight(task_id).await? {
            return Ok(Placement::InFlight);
        }

        let local_ip = self.manager.identity().ip();
        if self.ip_policy.is_blacklisted(local_ip).await? {
            return Ok(Placement::Blacklisted);
        }

        if let Some(holder) = self.manager.lock_holder(task_id).await? {
            if holder != self.manager.node_id() {
                debug!("task_id={} 的任务锁由 {} 持有", task_id, holder);
                return Ok(Placement::Contended);
            }
        }

        let local_load = self.manager.local_load();
        if local_load.value() < self.config.load_threshold {
            return self.claim_local(task_id).await;
        }

        let peers = self.eligible_peers().await?;
        match self.strategy.select_peer(&peers, self.config.load_threshold) {
            Some(peer) => {
                info!(
                    "[DIST_DELEGATE] 本地负载 {} 超过阈值 {}，{} 策略选择节点 {} (负载: {})",
                    local_load,
                    self.config.load_threshold,
                    self.strategy.name(),
                    peer.node_id,
                    peer.load_metric
                );
                self.delegate(task_id, job, ctx, &peer.node_id).await
            }
            None => {
                debug!("没有合适的对端，task_id={} 回退到本地执行", task_id);
                self.claim_local(task_id).await
            }
        }
    }

    /// 心跳新鲜、不在黑名单中的其他节点
    async fn eligible_peers(&self) -> FleetResult<Vec<NodeRecord>> {
        let mut eligible = Vec::new();
        for peer in self.manager.live_peers().await? {
            let blacklisted = match NodeIdentity::ip_of(&peer.node_id) {
                Some(ip) => self.ip_policy.is_blacklisted(ip).await?,
                None => false,
            };
            if blacklisted {
                debug!("跳过黑名单节点 {}", peer.node_id);
                continue;
            }
            eligible.push(peer);
        }
        Ok(eligible)
    }

    async fn claim_local(&self, task_id: &str) -> FleetResult<Placement> {
        match self.manager.try_lock(task_id, self.config.lock_ttl).await? {
            Some(handle) => {
                self.held_locks
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(task_id.to_string(), handle);
                Ok(Placement::Local)
            }
            None => Ok(Placement::Contended),
        }
    }

    /// 先打分发标记再写入对端队列，对端确认时会清除标记
    async fn delegate(
        &self,
        task_id: &str,
        job: &JobMetadata,
        ctx: &ExecutionContext,
        target_node: &str,
    ) -> FleetResult<Placement> {
        self.queue
            .mark_distributed(task_id, target_node, self.config.distributed_marker_ttl)
            .await?;

        let message = TaskMessage::new(
            task_id,
            target_node,
            job.to_payload()?,
            job.priority,
            ctx.trace_id.clone(),
        );
        if let Err(e) = self.queue.enqueue(&message).await {
            let _ = self.queue.clear_distributed(task_id).await;
            return Err(e);
        }

        Ok(Placement::Delegated {
            target_node: target_node.to_string(),
        })
    }

    /// 释放本次决策持有的任务锁
    pub async fn release(&self, task_id: &str) {
        let handle = self
            .held_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(task_id);
        if let Some(handle) = handle {
            match self.manager.unlock(&handle).await {
                Ok(true) => debug!("释放任务锁 task_id={}", task_id),
                Ok(false) => warn!("任务锁 task_id={} 已过期或被他人持有", task_id),
                Err(e) => warn!("释放任务锁失败 task_id={}: {}", task_id, e),
            }
        }
    }

    pub fn holds_lock(&self, task_id: &str) -> bool {
        self.held_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }
}
