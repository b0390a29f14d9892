use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_cluster::{AllowAllIpPolicy, LockHandle, SchedulerManager};
use fleet_dispatcher::{Placement, TaskDistributor};
use fleet_domain::{
    new_trace_id, now_millis, ExecutionContext, ExecutionLogEntry, ExecutionLogSink, ExecutionStatus,
    FireEvent, IpPolicy, JobInvoker, SkipReason,
};
use fleet_queue::{run_job, DurableTaskQueue, ExecutingGuard, ExecutingTasks};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::hooks::PreHook;

#[derive(Debug, Clone)]
pub struct ExecutionGuardConfig {
    pub fire_lock_ttl: Duration,
}

impl Default for ExecutionGuardConfig {
    fn default() -> Self {
        Self {
            fire_lock_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    Executed,
    Failed(String),
    Skipped(SkipReason),
}

impl FireOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FireOutcome::Executed => "executed",
            FireOutcome::Failed(_) => "failed",
            FireOutcome::Skipped(reason) => reason.as_str(),
        }
    }

    fn status(&self) -> ExecutionStatus {
        match self {
            FireOutcome::Executed => ExecutionStatus::Succeeded,
            FireOutcome::Failed(error) => ExecutionStatus::Failed {
                error: error.clone(),
            },
            FireOutcome::Skipped(reason) => ExecutionStatus::Skipped {
                reason: reason.clone(),
            },
        }
    }
}

/// 本次触发占用的资源，触发结束时统一释放
#[derive(Default)]
struct FireResources {
    fire_lock: Option<LockHandle>,
    running: Option<ExecutingGuard>,
    distributor_task: Option<String>,
}

pub struct ExecutionGuard {
    manager: Arc<SchedulerManager>,
    queue: Arc<DurableTaskQueue>,
    distributor: Arc<TaskDistributor>,
    invoker: Arc<dyn JobInvoker>,
    sink: Arc<dyn ExecutionLogSink>,
    ip_policy: Arc<dyn IpPolicy>,
    executing: Arc<ExecutingTasks>,
    pre_hooks: Vec<Arc<dyn PreHook>>,
    config: ExecutionGuardConfig,
}

impl ExecutionGuard {
    pub fn new(
        manager: Arc<SchedulerManager>,
        queue: Arc<DurableTaskQueue>,
        distributor: Arc<TaskDistributor>,
        invoker: Arc<dyn JobInvoker>,
        sink: Arc<dyn ExecutionLogSink>,
        config: ExecutionGuardConfig,
    ) -> Self {
        Self {
            manager,
            queue,
            distributor,
            invoker,
            sink,
            ip_policy: Arc::new(AllowAllIpPolicy),
            executing: ExecutingTasks::new(),
            pre_hooks: Vec::new(),
            config,
        }
    }

    pub fn with_ip_policy(mut self, ip_policy: Arc<dyn IpPolicy>) -> Self {
        self.ip_policy = ip_policy;
        self
    }

    /// 与队列消费者共享，使本地重入判断覆盖两条执行路径
    pub fn with_executing(mut self, executing: Arc<ExecutingTasks>) -> Self {
        self.executing = executing;
        self
    }

    pub fn with_pre_hook(mut self, hook: Arc<dyn PreHook>) -> Self {
        self.pre_hooks.push(hook);
        self
    }

    pub fn executing(&self) -> &Arc<ExecutingTasks> {
        &self.executing
    }

    /// 处理一次触发，任何失败都不会向触发源传播
    pub async fn fire(&self, event: FireEvent) -> FireOutcome {
        let trace_id = new_trace_id();
        let span = info_span!("fire", trace_id = %trace_id, job_key = %event.job_key);
        self.fire_in_span(event, trace_id).instrument(span).await
    }

    async fn fire_in_span(&self, event: FireEvent, trace_id: String) -> FireOutcome {
        let started = Instant::now();
        let ctx = ExecutionContext::new(trace_id, event.job_key.clone(), self.manager.node_id());
        let mut resources = FireResources::default();

        let outcome = self.guarded_run(&event, &ctx, &mut resources).await;

        self.release(resources).await;
        self.record(&ctx, &outcome).await;
        metrics::counter!("fleet_guard_fires_total", "outcome" => outcome.label()).increment(1);
        metrics::histogram!("fleet_guard_fire_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn guarded_run(
        &self,
        event: &FireEvent,
        ctx: &ExecutionContext,
        resources: &mut FireResources,
    ) -> FireOutcome {
        let job = &event.job;

        for (index, hook) in self.pre_hooks.iter().enumerate() {
            if !hook.before_fire(ctx, job).await {
                debug!("第 {} 个前置钩子否决了本次触发", index + 1);
                return FireOutcome::Skipped(SkipReason::Vetoed);
            }
        }

        match self.ip_policy.is_blacklisted(self.manager.identity().ip()).await {
            Ok(true) => return FireOutcome::Skipped(SkipReason::Blacklisted),
            Ok(false) => {}
            Err(e) => warn!("读取IP黑名单失败，继续执行: {}", e),
        }

        if self.manager.requires_master(job.job_id).await && !self.manager.is_master().await {
            return FireOutcome::Skipped(SkipReason::NotMaster);
        }

        match self.queue.is_task_in_flight(&event.job_key).await {
            Ok(true) => return FireOutcome::Skipped(SkipReason::QueueProcessing),
            Ok(false) => {}
            Err(e) => warn!("读取在途标记失败，继续执行: {}", e),
        }

        match self
            .manager
            .try_lock(&event.fire_resource(), self.config.fire_lock_ttl)
            .await
        {
            Ok(Some(handle)) => resources.fire_lock = Some(handle),
            Ok(None) => return FireOutcome::Skipped(SkipReason::LockContention),
            Err(e) => warn!("获取单次触发锁失败，继续执行: {}", e),
        }

        match self.executing.try_enter(&event.job_key) {
            Some(running) => resources.running = Some(running),
            None => return FireOutcome::Skipped(SkipReason::AlreadyExecuting),
        }

        resources.distributor_task = Some(event.job_key.clone());
        match self.distributor.decide(&event.job_key, job, ctx).await {
            Placement::Local => {}
            Placement::Delegated { target_node } => {
                return FireOutcome::Skipped(SkipReason::DispatchedElsewhere { target_node })
            }
            Placement::InFlight => return FireOutcome::Skipped(SkipReason::QueueProcessing),
            Placement::Blacklisted => return FireOutcome::Skipped(SkipReason::Blacklisted),
            Placement::Contended => return FireOutcome::Skipped(SkipReason::LockContention),
        }

        self.sink.record_start(ctx).await;
        let _slot = self.manager.pool_usage().acquire();
        info!("[GUARD_EXECUTE] 开始执行 job_key={} node={}", ctx.job_key, ctx.node_id);
        match run_job(self.invoker.as_ref(), job, ctx).await {
            Ok(()) => FireOutcome::Executed,
            Err(e) => {
                error!("[GUARD_FAILED] job_key={} 执行失败: {}", ctx.job_key, e);
                FireOutcome::Failed(e.to_string())
            }
        }
    }

    async fn release(&self, resources: FireResources) {
        drop(resources.running);
        if let Some(task_id) = resources.distributor_task {
            self.distributor.release(&task_id).await;
        }
        if let Some(handle) = resources.fire_lock {
            if let Err(e) = self.manager.unlock(&handle).await {
                warn!("释放单次触发锁失败 resource={}: {}", handle.resource, e);
            }
        }
    }

    async fn record(&self, ctx: &ExecutionContext, outcome: &FireOutcome) {
        let status = outcome.status();
        let entry = match outcome {
            FireOutcome::Skipped(reason) => {
                info!("[GUARD_SKIP] job_key={} reason={}", ctx.job_key, reason.as_str());
                let mut entry = ExecutionLogEntry::skipped(ctx, reason.clone());
                if let SkipReason::DispatchedElsewhere { target_node } = reason {
                    entry = entry.with_message(format!("已分发到 {target_node}"));
                }
                entry
            }
            FireOutcome::Executed => ExecutionLogEntry::finished(ctx, status.clone()).with_message(
                format!("耗时 {}ms", ctx.elapsed_ms(now_millis())),
            ),
            FireOutcome::Failed(_) => ExecutionLogEntry::finished(ctx, status.clone()),
        };
        self.sink.append_log(entry).await;
        self.sink.record_complete(ctx, &status).await;
    }
}
