use std::sync::Arc;
use std::time::Duration;

use fleet_domain::{keys, now_millis, CoordinationStore, LoadMetric, NodeRecord};
use fleet_errors::FleetResult;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::identity::NodeIdentity;
use crate::pool::PoolUsage;

#[derive(Debug, Clone)]
pub struct SchedulerManagerConfig {
    pub election_interval: Duration,
    pub lease_ttl: Duration,
    /// 选举互斥锁只在读-抢占-续约期间持有
    pub election_lock_ttl: Duration,
    pub load_report_interval: Duration,
    pub usage_ttl: Duration,
    pub default_lock_ttl: Duration,
    /// 判断对端存活的心跳时效
    pub peer_freshness: Duration,
}

impl Default for SchedulerManagerConfig {
    fn default() -> Self {
        Self {
            election_interval: Duration::from_secs(30),
            lease_ttl: Duration::from_secs(60),
            election_lock_ttl: Duration::from_secs(10),
            load_report_interval: Duration::from_secs(10),
            usage_ttl: Duration::from_secs(60),
            default_lock_ttl: Duration::from_secs(60),
            peer_freshness: Duration::from_secs(120),
        }
    }
}

/// 单轮选举结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// 租约为空，本节点成为主节点
    Claimed,
    /// 本节点已是主节点，续约
    Renewed,
    /// 其他节点持有租约
    Follower(String),
    /// 其他节点正在选举
    Contended,
}

/// 持有中的命名锁
///
/// 没有fencing token：TTL过期后锁可能被他人重新获取，而原持有者仍以为自己持有。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub resource: String,
    pub owner: String,
}

/// 主节点选举、任务亲和性、负载上报与命名锁
///
/// 租约基于TTL，续约与过期竞争时可能短暂出现两个主节点。
pub struct SchedulerManager {
    store: Arc<dyn CoordinationStore>,
    identity: NodeIdentity,
    usage: Arc<PoolUsage>,
    config: SchedulerManagerConfig,
}

impl SchedulerManager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: NodeIdentity,
        usage: Arc<PoolUsage>,
        config: SchedulerManagerConfig,
    ) -> Self {
        Self {
            store,
            identity,
            usage,
            config,
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn node_id(&self) -> &str {
        self.identity.node_id()
    }

    pub fn pool_usage(&self) -> &Arc<PoolUsage> {
        &self.usage
    }

    // ---- 选举 ----

    pub async fn elect_once(&self) -> FleetResult<ElectionOutcome> {
        let Some(handle) = self
            .try_lock(keys::MASTER_ELECTION_RESOURCE, self.config.election_lock_ttl)
            .await?
        else {
            return Ok(ElectionOutcome::Contended);
        };

        let outcome = self.claim_or_renew().await;
        if let Err(e) = self.unlock(&handle).await {
            warn!("释放选举锁失败: {}", e);
        }
        outcome
    }

    async fn claim_or_renew(&self) -> FleetResult<ElectionOutcome> {
        let node_id = self.identity.node_id();
        match self.store.get(keys::SCHEDULER_MASTER).await? {
            None => {
                self.store
                    .set(keys::SCHEDULER_MASTER, node_id, Some(self.config.lease_ttl))
                    .await?;
                info!("[MASTER_ELECTED] 本节点成为主节点 node_id={}", node_id);
                metrics::counter!("fleet_master_elections_total").increment(1);
                Ok(ElectionOutcome::Claimed)
            }
            Some(current) if current == node_id => {
                if !self
                    .store
                    .expire(keys::SCHEDULER_MASTER, self.config.lease_ttl)
                    .await?
                {
                    // 读与续约之间租约恰好过期
                    self.store
                        .set(keys::SCHEDULER_MASTER, node_id, Some(self.config.lease_ttl))
                        .await?;
                }
                debug!("[MASTER_RENEWED] node_id={}", node_id);
                Ok(ElectionOutcome::Renewed)
            }
            Some(current) => Ok(ElectionOutcome::Follower(current)),
        }
    }

    pub async fn run_election(&self) {
        match self.elect_once().await {
            Ok(ElectionOutcome::Contended) => debug!("其他节点正在选举，跳过本轮"),
            Ok(_) => {}
            Err(e) => warn!("[MASTER_ELECTION] 选举失败: {}", e),
        }
    }

    /// 单次读取租约，存储异常时视为非主节点
    pub async fn is_master(&self) -> bool {
        match self.store.get(keys::SCHEDULER_MASTER).await {
            Ok(Some(master)) => master == self.identity.node_id(),
            Ok(None) => false,
            Err(e) => {
                warn!("读取主节点租约失败: {}", e);
                false
            }
        }
    }

    pub async fn current_master(&self) -> FleetResult<Option<String>> {
        self.store.get(keys::SCHEDULER_MASTER).await
    }

    /// 主动让出主节点身份，仅在租约仍属于自己时删除
    pub async fn resign(&self) -> FleetResult<bool> {
        let released = self
            .store
            .delete_if_equals(keys::SCHEDULER_MASTER, self.identity.node_id())
            .await?;
        if released {
            info!("[MASTER_RESIGN] 本节点让出主节点 node_id={}", self.identity.node_id());
        }
        Ok(released)
    }

    // ---- 任务亲和性 ----

    /// 缺失或读取失败时返回 false，任何节点都可以执行
    pub async fn requires_master(&self, job_id: i64) -> bool {
        match self.store.get(&keys::job_master_node(job_id)).await {
            Ok(value) => value.as_deref() == Some("1"),
            Err(e) => {
                warn!("读取任务 {} 的亲和性失败，按无限制处理: {}", job_id, e);
                false
            }
        }
    }

    pub async fn set_affinity(&self, job_id: i64, requires_master: bool) -> FleetResult<()> {
        let value = if requires_master { "1" } else { "0" };
        self.store
            .set(&keys::job_master_node(job_id), value, None)
            .await?;
        info!("[JOB_AFFINITY] job_id={} requires_master={}", job_id, requires_master);
        Ok(())
    }

    pub async fn remove_affinity(&self, job_id: i64) -> FleetResult<()> {
        self.store.delete(&keys::job_master_node(job_id)).await?;
        Ok(())
    }

    // ---- 负载 ----

    pub fn local_load(&self) -> LoadMetric {
        self.usage.load_metric()
    }

    pub async fn report_load(&self) -> FleetResult<()> {
        let load = self.local_load();
        self.store
            .set(
                &keys::node_usage(self.identity.node_id()),
                &load.value().to_string(),
                Some(self.config.usage_ttl),
            )
            .await?;
        metrics::gauge!("fleet_node_load").set(load.value());
        Ok(())
    }

    pub async fn alive_nodes(&self) -> FleetResult<Vec<String>> {
        self.store.set_members(keys::SCHEDULER_NODES).await
    }

    /// 心跳新鲜的其他节点及其负载，负载缺失按1.0处理
    pub async fn live_peers_at(&self, now: i64) -> FleetResult<Vec<NodeRecord>> {
        let freshness_ms = self.config.peer_freshness.as_millis() as i64;
        let mut peers = Vec::new();
        for node_id in self.alive_nodes().await? {
            if node_id == self.identity.node_id() {
                continue;
            }
            let heartbeat_at = self
                .store
                .get(&keys::node_heartbeat(&node_id))
                .await?
                .and_then(|raw| raw.parse::<i64>().ok());
            let usage = self.store.get(&keys::node_usage(&node_id)).await?;
            let record = NodeRecord {
                node_id,
                heartbeat_at,
                load_metric: LoadMetric::parse_or_unknown(usage.as_deref()),
            };
            if !record.is_stale(now, freshness_ms) {
                peers.push(record);
            }
        }
        Ok(peers)
    }

    pub async fn live_peers(&self) -> FleetResult<Vec<NodeRecord>> {
        self.live_peers_at(now_millis()).await
    }

    // ---- 命名锁 ----

    /// 单次条件写入，不重试；未获取到返回 `None`
    pub async fn try_lock(&self, resource: &str, ttl: Duration) -> FleetResult<Option<LockHandle>> {
        let owner = self.identity.node_id();
        if self
            .store
            .set_if_absent(&keys::lock(resource), owner, ttl)
            .await?
        {
            Ok(Some(LockHandle {
                resource: resource.to_string(),
                owner: owner.to_string(),
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn try_lock_default(&self, resource: &str) -> FleetResult<Option<LockHandle>> {
        self.try_lock(resource, self.config.default_lock_ttl).await
    }

    /// 只删除自己持有的锁
    pub async fn unlock(&self, handle: &LockHandle) -> FleetResult<bool> {
        self.store
            .delete_if_equals(&keys::lock(&handle.resource), &handle.owner)
            .await
    }

    pub async fn lock_holder(&self, resource: &str) -> FleetResult<Option<String>> {
        self.store.get(&keys::lock(resource)).await
    }

    // ---- 后台任务 ----

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let election = {
            let manager = Arc::clone(&self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(manager.config.election_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => manager.run_election().await,
                        _ = shutdown_rx.recv() => {
                            info!("选举任务退出");
                            break;
                        }
                    }
                }
            })
        };

        let load_report = {
            let manager = Arc::clone(&self);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut ticker = interval(manager.config.load_report_interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = manager.report_load().await {
                                warn!("[LOAD_REPORT] 负载上报失败: {}", e);
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("负载上报任务退出");
                            break;
                        }
                    }
                }
            })
        };

        vec![election, load_report]
    }
}
