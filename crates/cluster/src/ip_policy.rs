use std::sync::Arc;

use async_trait::async_trait;
use fleet_domain::{keys, CoordinationStore, IpPolicy};
use fleet_errors::FleetResult;
use tracing::info;

/// 存储在 `quartz:ip:blacklist` 集合中的IP黑名单
pub struct StoreIpPolicy {
    store: Arc<dyn CoordinationStore>,
}

impl StoreIpPolicy {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    pub async fn add(&self, ip: &str) -> FleetResult<bool> {
        let added = self.store.set_add(keys::IP_BLACKLIST, ip).await?;
        if added {
            info!("[IP_BLACKLIST] 加入黑名单: {}", ip);
        }
        Ok(added)
    }

    pub async fn remove(&self, ip: &str) -> FleetResult<bool> {
        let removed = self.store.set_remove(keys::IP_BLACKLIST, ip).await?;
        if removed {
            info!("[IP_BLACKLIST] 移出黑名单: {}", ip);
        }
        Ok(removed)
    }

    pub async fn list(&self) -> FleetResult<Vec<String>> {
        self.store.set_members(keys::IP_BLACKLIST).await
    }
}

#[async_trait]
impl IpPolicy for StoreIpPolicy {
    async fn is_blacklisted(&self, ip: &str) -> FleetResult<bool> {
        self.store.set_contains(keys::IP_BLACKLIST, ip).await
    }
}

/// 不做任何限制
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllIpPolicy;

#[async_trait]
impl IpPolicy for AllowAllIpPolicy {
    async fn is_blacklisted(&self, _ip: &str) -> FleetResult<bool> {
        Ok(false)
    }
}
