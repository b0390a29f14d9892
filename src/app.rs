use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fleet_cluster::{
    NodeIdentity, NodeMonitor, NodeMonitorConfig, NodeQueueDrain, NodeRegistry,
    NodeRegistryConfig, PoolUsage, SchedulerManager, SchedulerManagerConfig, StoreIpPolicy,
};
use fleet_config::AppConfig;
use fleet_dispatcher::{MinMaxAvoidedStrategy, TaskDistributor, TaskDistributorConfig};
use fleet_domain::{CoordinationStore, ExecutionLogSink, IpPolicy, JobInvoker};
use fleet_guard::{ExecutionGuard, ExecutionGuardConfig};
use fleet_infrastructure::{RedisConnectionManager, RedisCoordinationStore};
use fleet_queue::{
    BackoffPolicy, DurableTaskQueue, DurableTaskQueueConfig, QueueWorker, QueueWorkerConfig,
};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::invoker::ShellJobInvoker;
use crate::log_sink::TracingLogSink;
use crate::shutdown::ShutdownManager;
use crate::trigger::CronTrigger;

pub fn registry_config(config: &AppConfig) -> NodeRegistryConfig {
    NodeRegistryConfig {
        heartbeat_interval: config.node.heartbeat_interval(),
        heartbeat_ttl: config.node.heartbeat_ttl(),
        membership_ttl: config.node.membership_ttl(),
    }
}

pub fn monitor_config(config: &AppConfig) -> NodeMonitorConfig {
    NodeMonitorConfig {
        check_interval: Duration::from_secs(config.monitor.interval_seconds),
        offline_threshold: Duration::from_secs(config.monitor.offline_threshold_seconds),
    }
}

pub fn manager_config(config: &AppConfig) -> SchedulerManagerConfig {
    SchedulerManagerConfig {
        election_interval: Duration::from_secs(config.election.interval_seconds),
        lease_ttl: Duration::from_secs(config.election.lease_ttl_seconds),
        election_lock_ttl: Duration::from_secs(config.election.election_lock_ttl_seconds),
        load_report_interval: Duration::from_secs(config.load.report_interval_seconds),
        usage_ttl: Duration::from_secs(config.load.usage_ttl_seconds),
        default_lock_ttl: Duration::from_secs(config.lock.default_ttl_seconds),
        // 与离线判定使用同一时效，监控驱逐之前的节点仍可接收任务
        peer_freshness: Duration::from_secs(config.monitor.offline_threshold_seconds),
    }
}

pub fn queue_config(config: &AppConfig) -> DurableTaskQueueConfig {
    DurableTaskQueueConfig {
        backoff: BackoffPolicy {
            base_ms: config.queue.backoff_base_ms,
            cap_ms: config.queue.backoff_cap_ms,
        },
        promotion_batch: config.queue.promotion_batch,
        reclaim_window: config.queue.reclaim_window,
        stale_timeout: Duration::from_secs(config.queue.stale_timeout_seconds),
        inflight_marker_ttl: Duration::from_secs(config.queue.inflight_marker_ttl_seconds),
        recent_history: config.queue.recent_history,
    }
}

pub fn worker_config(config: &AppConfig) -> QueueWorkerConfig {
    QueueWorkerConfig {
        consumer_count: config.queue.consumer_count,
        pop_timeout: Duration::from_secs(config.queue.pop_timeout_seconds),
        promotion_interval: Duration::from_millis(config.queue.promotion_interval_ms),
        reclaim_interval: Duration::from_secs(config.queue.reclaim_interval_seconds),
        ..QueueWorkerConfig::default()
    }
}

pub fn distributor_config(config: &AppConfig) -> TaskDistributorConfig {
    TaskDistributorConfig {
        load_threshold: config.distributor.load_threshold,
        distributed_marker_ttl: Duration::from_secs(config.distributor.distributed_marker_ttl_seconds),
        lock_ttl: Duration::from_secs(config.lock.default_ttl_seconds),
    }
}

pub fn guard_config(config: &AppConfig) -> ExecutionGuardConfig {
    ExecutionGuardConfig {
        fire_lock_ttl: Duration::from_secs(config.guard.fire_lock_ttl_seconds),
    }
}

/// 组件图构造器，未指定的协作方使用默认实现
pub struct ApplicationBuilder {
    config: AppConfig,
    store: Option<Arc<dyn CoordinationStore>>,
    invoker: Option<Arc<dyn JobInvoker>>,
    sink: Option<Arc<dyn ExecutionLogSink>>,
    ip_policy: Option<Arc<dyn IpPolicy>>,
}

impl ApplicationBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            invoker: None,
            sink: None,
            ip_policy: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn JobInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_log_sink(mut self, sink: Arc<dyn ExecutionLogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_ip_policy(mut self, ip_policy: Arc<dyn IpPolicy>) -> Self {
        self.ip_policy = Some(ip_policy);
        self
    }

    /// 只在进程启动时构造一次，之后通过引用传递
    pub async fn build(self) -> Result<Application> {
        let config = self.config;
        let store = match self.store {
            Some(store) => store,
            None => {
                let connections = RedisConnectionManager::new(config.redis.clone())
                    .await
                    .context("连接Redis失败")?;
                Arc::new(RedisCoordinationStore::new(Arc::new(connections))) as Arc<dyn CoordinationStore>
            }
        };

        let identity = NodeIdentity::resolve(config.node.node_id.as_deref(), config.node.ip.as_deref())
            .context("解析节点身份失败")?;
        let node_id = identity.node_id().to_string();
        info!("[NODE_IDENTITY] node_id={} host={}", node_id, identity.hostname());

        let usage = PoolUsage::new(config.load.pool_size);
        let ip_policy = self
            .ip_policy
            .unwrap_or_else(|| Arc::new(StoreIpPolicy::new(Arc::clone(&store))));
        let invoker = self
            .invoker
            .unwrap_or_else(|| Arc::new(ShellJobInvoker::new()));
        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingLogSink::new()));

        let registry = Arc::new(NodeRegistry::new(
            Arc::clone(&store),
            identity.clone(),
            Arc::clone(&usage),
            registry_config(&config),
        ));
        let manager = Arc::new(SchedulerManager::new(
            Arc::clone(&store),
            identity,
            Arc::clone(&usage),
            manager_config(&config),
        ));
        let queue = Arc::new(DurableTaskQueue::new(
            Arc::clone(&store),
            node_id.clone(),
            queue_config(&config),
        ));
        let monitor = Arc::new(NodeMonitor::new(
            Arc::clone(&store),
            Arc::clone(&queue) as Arc<dyn NodeQueueDrain>,
            node_id,
            monitor_config(&config),
        ));
        let worker = Arc::new(QueueWorker::new(
            Arc::clone(&queue),
            Arc::clone(&invoker),
            Arc::clone(&sink),
            Arc::clone(&usage),
            worker_config(&config),
        ));
        let distributor = Arc::new(TaskDistributor::new(
            Arc::clone(&manager),
            Arc::clone(&queue),
            Arc::clone(&ip_policy),
            Arc::new(MinMaxAvoidedStrategy::new()),
            distributor_config(&config),
        ));
        let guard = Arc::new(
            ExecutionGuard::new(
                Arc::clone(&manager),
                Arc::clone(&queue),
                distributor,
                invoker,
                sink,
                guard_config(&config),
            )
            .with_ip_policy(ip_policy)
            .with_executing(Arc::clone(worker.executing())),
        );
        let trigger = Arc::new(
            CronTrigger::from_definitions(Arc::clone(&guard), &config.jobs)
                .context("加载定时任务失败")?,
        );

        Ok(Application {
            config,
            registry,
            monitor,
            manager,
            queue,
            worker,
            guard,
            trigger,
        })
    }
}

/// 一个节点进程内的全部组件
pub struct Application {
    config: AppConfig,
    registry: Arc<NodeRegistry>,
    monitor: Arc<NodeMonitor>,
    manager: Arc<SchedulerManager>,
    queue: Arc<DurableTaskQueue>,
    worker: Arc<QueueWorker>,
    guard: Arc<ExecutionGuard>,
    trigger: Arc<CronTrigger>,
}

impl Application {
    pub fn node_id(&self) -> &str {
        self.manager.node_id()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn manager(&self) -> &Arc<SchedulerManager> {
        &self.manager
    }

    pub fn queue(&self) -> &Arc<DurableTaskQueue> {
        &self.queue
    }

    pub fn guard(&self) -> &Arc<ExecutionGuard> {
        &self.guard
    }

    /// 注册节点、写入任务亲和性并启动所有后台循环
    pub async fn start(&self, shutdown: &ShutdownManager) -> Vec<JoinHandle<()>> {
        self.registry.register().await;
        for scheduled in self.trigger.jobs() {
            if let Err(e) = self
                .manager
                .set_affinity(scheduled.job.job_id, scheduled.requires_master)
                .await
            {
                warn!("写入任务 {} 的亲和性失败: {}", scheduled.job.job_key(), e);
            }
        }
        self.manager.run_election().await;

        let mut handles = vec![
            Arc::clone(&self.registry).start(shutdown.subscribe()),
            Arc::clone(&self.monitor).start(shutdown.subscribe()),
        ];
        handles.extend(Arc::clone(&self.manager).start(shutdown.sender()));
        handles.extend(Arc::clone(&self.worker).start(shutdown.sender()));
        handles.extend(Arc::clone(&self.trigger).start(shutdown.sender()));

        info!(
            "[APP_STARTED] node_id={} 后台任务 {} 个，定时任务 {} 个",
            self.node_id(),
            handles.len(),
            self.trigger.jobs().len()
        );
        handles
    }

    /// 后台循环退出后调用：让出主节点并注销
    pub async fn stop(&self) {
        if let Err(e) = self.manager.resign().await {
            warn!("让出主节点失败: {}", e);
        }
        self.registry.deregister().await;
        info!("[APP_STOPPED] node_id={}", self.node_id());
    }
}
