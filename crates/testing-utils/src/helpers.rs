//! Integration test helpers

use std::time::Duration;

use fleet_domain::{keys, CoordinationStore, FleetResult};

/// 直接写入一个节点的成员关系、心跳和负载，模拟对端节点
pub async fn seed_node(
    store: &dyn CoordinationStore,
    node_id: &str,
    heartbeat_at: Option<i64>,
    usage: Option<f64>,
) -> FleetResult<()> {
    store.set_add(keys::SCHEDULER_NODES, node_id).await?;
    if let Some(at) = heartbeat_at {
        store
            .set(
                &keys::node_heartbeat(node_id),
                &at.to_string(),
                Some(Duration::from_secs(300)),
            )
            .await?;
    }
    if let Some(usage) = usage {
        store
            .set(
                &keys::node_usage(node_id),
                &usage.to_string(),
                Some(Duration::from_secs(300)),
            )
            .await?;
    }
    Ok(())
}

/// 轮询直到条件满足或超时，返回最终结果
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
