use std::sync::Arc;
use std::time::Duration;

use fleet_domain::{keys, now_millis, CoordinationStore};
use fleet_errors::{FleetError, FleetResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::identity::NodeIdentity;
use crate::pool::PoolUsage;

#[derive(Debug, Clone)]
pub struct NodeRegistryConfig {
    pub heartbeat_interval: Duration,
    /// 心跳与负载键的TTL，远大于心跳周期，错过一次心跳不会被判离线
    pub heartbeat_ttl: Duration,
    pub membership_ttl: Duration,
}

impl Default for NodeRegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_ttl: Duration::from_secs(300),
            membership_ttl: Duration::from_secs(300),
        }
    }
}

/// 节点注册与心跳
///
/// 存储不可达时只记录日志，不向上抛出，影响的只是本节点的参与度。
pub struct NodeRegistry {
    store: Arc<dyn CoordinationStore>,
    identity: NodeIdentity,
    usage: Arc<PoolUsage>,
    config: NodeRegistryConfig,
}

impl NodeRegistry {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        identity: NodeIdentity,
        usage: Arc<PoolUsage>,
        config: NodeRegistryConfig,
    ) -> Self {
        Self {
            store,
            identity,
            usage,
            config,
        }
    }

    pub fn node_id(&self) -> &str {
        self.identity.node_id()
    }

    /// 加入成员集合并写入首次心跳，可重复调用
    pub async fn register(&self) {
        match self.publish().await {
            Ok(()) => info!(
                "[NODE_REGISTER] 节点注册成功 node_id={} host={}",
                self.identity.node_id(),
                self.identity.hostname()
            ),
            Err(e) => warn!(
                "[NODE_REGISTER] 节点注册失败 node_id={}: {}",
                self.identity.node_id(),
                e
            ),
        }
    }

    pub async fn heartbeat(&self) {
        match self.publish().await {
            Ok(()) => debug!(
                "[NODE_HEARTBEAT] node_id={} load={}",
                self.identity.node_id(),
                self.usage.load_metric()
            ),
            Err(e) => warn!(
                "[NODE_HEARTBEAT] 心跳写入失败 node_id={}: {}",
                self.identity.node_id(),
                e
            ),
        }
    }

    /// 每次心跳都重新加入成员集合，被误判离线后可以自愈
    async fn publish(&self) -> FleetResult<()> {
        let node_id = self.identity.node_id();
        self.store.set_add(keys::SCHEDULER_NODES, node_id).await?;
        self.store
            .expire(keys::SCHEDULER_NODES, self.config.membership_ttl)
            .await?;
        self.store
            .set(
                &keys::node_heartbeat(node_id),
                &now_millis().to_string(),
                Some(self.config.heartbeat_ttl),
            )
            .await?;
        self.store
            .set(
                &keys::node_usage(node_id),
                &self.usage.load_metric().value().to_string(),
                Some(self.config.heartbeat_ttl),
            )
            .await?;
        Ok(())
    }

    /// 尽力注销，存储不可达时直接跳过
    pub async fn deregister(&self) {
        let node_id = self.identity.node_id();
        let result = async {
            self.store.set_remove(keys::SCHEDULER_NODES, node_id).await?;
            self.store.delete(&keys::node_heartbeat(node_id)).await?;
            self.store.delete(&keys::node_usage(node_id)).await?;
            Ok::<(), FleetError>(())
        }
        .await;

        match result {
            Ok(()) => info!("[NODE_DEREGISTER] 节点已注销 node_id={}", node_id),
            Err(e) => warn!("[NODE_DEREGISTER] 注销失败，跳过 node_id={}: {}", node_id, e),
        }
    }

    pub fn start(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.config.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.heartbeat().await,
                    _ = shutdown_rx.recv() => {
                        info!("心跳任务退出");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_infrastructure::InMemoryCoordinationStore;

    fn registry(store: Arc<InMemoryCoordinationStore>, usage: Arc<PoolUsage>) -> NodeRegistry {
        NodeRegistry::new(
            store,
            NodeIdentity::generate("10.0.0.1"),
            usage,
            NodeRegistryConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_writes_membership_heartbeat_and_usage() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let usage = PoolUsage::new(4);
        let _slot = usage.acquire();
        let registry = registry(store.clone(), usage);
        registry.register().await;

        let node_id = registry.node_id().to_string();
        assert!(store.set_contains(keys::SCHEDULER_NODES, &node_id).await.unwrap());
        assert!(store.get(&keys::node_heartbeat(&node_id)).await.unwrap().is_some());
        assert_eq!(
            store.get(&keys::node_usage(&node_id)).await.unwrap().as_deref(),
            Some("0.25")
        );
        assert_eq!(
            store.ttl(&keys::node_heartbeat(&node_id)),
            Some(Duration::from_secs(300))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_readds_evicted_node() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let registry = registry(store.clone(), PoolUsage::new(1));
        registry.register().await;
        store
            .set_remove(keys::SCHEDULER_NODES, registry.node_id())
            .await
            .unwrap();

        registry.heartbeat().await;
        assert!(store
            .set_contains(keys::SCHEDULER_NODES, registry.node_id())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_store_does_not_raise() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let registry = registry(store.clone(), PoolUsage::new(1));
        store.set_offline(true);

        registry.register().await;
        registry.heartbeat().await;
        registry.deregister().await;

        store.set_offline(false);
        assert!(store.set_members(keys::SCHEDULER_NODES).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deregister_removes_keys() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let registry = registry(store.clone(), PoolUsage::new(1));
        registry.register().await;
        registry.deregister().await;

        let node_id = registry.node_id();
        assert!(!store.set_contains(keys::SCHEDULER_NODES, node_id).await.unwrap());
        assert!(!store.exists(&keys::node_heartbeat(node_id)).await.unwrap());
        assert!(!store.exists(&keys::node_usage(node_id)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_loop_stops_on_shutdown() {
        let store = Arc::new(InMemoryCoordinationStore::new());
        let registry = Arc::new(registry(store.clone(), PoolUsage::new(1)));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = registry.clone().start(shutdown_rx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store
            .exists(&keys::node_heartbeat(registry.node_id()))
            .await
            .unwrap());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
