use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::{keys, now_millis, CoordinationStore, LoadMetric, NodeRecord};
use fleet_errors::FleetResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 把离线节点的待处理任务转移到全局再分配队列
#[async_trait]
pub trait NodeQueueDrain: Send + Sync {
    /// 返回转移的任务数
    async fn drain_node(&self, node_id: &str) -> FleetResult<usize>;
}

#[derive(Debug, Clone)]
pub struct NodeMonitorConfig {
    pub check_interval: Duration,
    /// 心跳超过该时长即判定离线
    pub offline_threshold: Duration,
}

impl Default for NodeMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            offline_threshold: Duration::from_secs(120),
        }
    }
}

/// 节点离线检测
///
/// 先驱逐再回收队列：只有心跳过期才会触发，慢但仍存活的节点不会被抢走队列。
pub struct NodeMonitor {
    store: Arc<dyn CoordinationStore>,
    drain: Arc<dyn NodeQueueDrain>,
    local_node_id: String,
    config: NodeMonitorConfig,
}

impl NodeMonitor {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        drain: Arc<dyn NodeQueueDrain>,
        local_node_id: impl Into<String>,
        config: NodeMonitorConfig,
    ) -> Self {
        Self {
            store,
            drain,
            local_node_id: local_node_id.into(),
            config,
        }
    }

    /// 执行一轮检测，返回被驱逐的节点
    ///
    /// 先重试上一轮没有回收完的节点，再扫描成员集合。
    pub async fn check_nodes_at(&self, now: i64) -> FleetResult<Vec<String>> {
        let threshold_ms = self.config.offline_threshold.as_millis() as i64;
        self.retry_pending_drains(now, threshold_ms).await?;

        let members = self.store.set_members(keys::SCHEDULER_NODES).await?;
        let mut evicted = Vec::new();

        for node_id in members {
            // 本节点是否存活由自己的心跳负责
            if node_id == self.local_node_id {
                continue;
            }
            let record = self.read_record(&node_id).await?;
            if !record.is_stale(now, threshold_ms) {
                continue;
            }

            match record.heartbeat_at {
                Some(at) => warn!(
                    "[NODE_OFFLINE] 节点心跳超时 node_id={} 已离线 {}ms",
                    node_id,
                    now - at
                ),
                None => warn!("[NODE_OFFLINE] 节点心跳缺失 node_id={}", node_id),
            }
            self.evict(&node_id).await?;
            evicted.push(node_id);
        }

        Ok(evicted)
    }

    async fn read_record(&self, node_id: &str) -> FleetResult<NodeRecord> {
        let heartbeat_at = self
            .store
            .get(&keys::node_heartbeat(node_id))
            .await?
            .and_then(|raw| raw.parse::<i64>().ok());
        Ok(NodeRecord {
            node_id: node_id.to_string(),
            heartbeat_at,
            load_metric: LoadMetric::UNKNOWN,
        })
    }

    /// 删除心跳与负载键、移出成员集合，最后回收队列
    ///
    /// 移出成员集合之前先登记到待回收集合，回收成功后才删除登记，
    /// 中途失败的节点下一轮仍能找到。
    async fn evict(&self, node_id: &str) -> FleetResult<()> {
        self.store.set_add(keys::PENDING_DRAIN_NODES, node_id).await?;
        self.store.delete(&keys::node_heartbeat(node_id)).await?;
        self.store.delete(&keys::node_usage(node_id)).await?;
        self.store.set_remove(keys::SCHEDULER_NODES, node_id).await?;
        metrics::counter!("fleet_nodes_evicted_total").increment(1);

        let drained = self.drain_and_settle(node_id).await?;
        info!(
            "[NODE_EVICTED] 节点已驱逐 node_id={}，转移任务 {} 个",
            node_id, drained
        );
        Ok(())
    }

    async fn drain_and_settle(&self, node_id: &str) -> FleetResult<usize> {
        let drained = self.drain.drain_node(node_id).await?;
        self.store.set_remove(keys::PENDING_DRAIN_NODES, node_id).await?;
        Ok(drained)
    }

    async fn retry_pending_drains(&self, now: i64, threshold_ms: i64) -> FleetResult<()> {
        for node_id in self.store.set_members(keys::PENDING_DRAIN_NODES).await? {
            // 节点已经恢复并重新注册，队列归它自己处理
            let rejoined = self.store.set_contains(keys::SCHEDULER_NODES, &node_id).await?
                && !self.read_record(&node_id).await?.is_stale(now, threshold_ms);
            if rejoined || node_id == self.local_node_id {
                info!("[NODE_DRAIN_RETRY] 节点已重新上线，取消回收 node_id={}", node_id);
                self.store.set_remove(keys::PENDING_DRAIN_NODES, &node_id).await?;
                continue;
            }

            let drained = self.drain_and_settle(&node_id).await?;
            info!(
                "[NODE_DRAIN_RETRY] 补回收离线节点队列 node_id={}，转移任务 {} 个",
                node_id, drained
            );
        }
        Ok(())
    }

    pub async fn run_check(&self) {
        match self.check_nodes_at(now_millis()).await {
            Ok(evicted) if evicted.is_empty() => debug!("节点检测完成，无离线节点"),
            Ok(evicted) => info!("本轮驱逐离线节点 {} 个", evicted.len()),
            Err(e) if e.is_store_unavailable() => warn!("协调存储不可达，跳过本轮节点检测: {}", e),
            Err(e) => error!("节点检测失败: {}", e),
        }
    }

    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.check_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_check().await,
                    _ = shutdown_rx.recv() => {
                        info!("节点监控任务退出");
                        break;
                    }
                }
            }
        })
    }
}
