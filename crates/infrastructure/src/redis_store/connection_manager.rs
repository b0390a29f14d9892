use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleet_config::RedisConfig;
use fleet_errors::{FleetError, FleetResult};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use tokio::sync::Mutex;
use tracing::{debug, error};

/// Redis连接管理
///
/// 普通命令共享一个自动重连的 `ConnectionManager`；BLMOVE 等阻塞命令会占住连接，
/// 因此单独维护一组专用连接，每个连接同一时刻只服务一个阻塞调用。
pub struct RedisConnectionManager {
    manager: ConnectionManager,
    blocking: Vec<Mutex<MultiplexedConnection>>,
    next_blocking: AtomicUsize,
    config: RedisConfig,
}

impl RedisConnectionManager {
    pub async fn new(config: RedisConfig) -> FleetResult<Self> {
        let client = Client::open(config.connection_url())
            .map_err(|e| FleetError::config_error(format!("无效的Redis地址: {e}")))?;
        let connect_timeout = Duration::from_secs(config.connection_timeout_seconds);

        let manager = tokio::time::timeout(connect_timeout, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| {
                FleetError::store_unavailable(format!(
                    "连接Redis超时 {}:{}",
                    config.host, config.port
                ))
            })??;

        let pool_size = blocking_pool_size(config.blocking_connections);
        let mut blocking = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = tokio::time::timeout(
                connect_timeout,
                client.get_multiplexed_async_connection(),
            )
            .await
            .map_err(|_| FleetError::store_unavailable("建立Redis阻塞连接超时"))??;
            blocking.push(Mutex::new(conn));
        }

        let connection_manager = Self {
            manager,
            blocking,
            next_blocking: AtomicUsize::new(0),
            config,
        };
        connection_manager.ping().await?;
        debug!(
            "Redis连接成功 {}:{}，阻塞连接数 {}",
            connection_manager.config.host,
            connection_manager.config.port,
            connection_manager.blocking.len()
        );
        Ok(connection_manager)
    }

    /// 共享连接句柄，克隆开销很小
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// 轮询取一个阻塞专用连接
    pub fn blocking_connection(&self) -> &Mutex<MultiplexedConnection> {
        let index = self.next_blocking.fetch_add(1, Ordering::Relaxed) % self.blocking.len();
        &self.blocking[index]
    }

    pub async fn ping(&self) -> FleetResult<()> {
        let mut conn = self.connection();
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        if response != "PONG" {
            let message = format!("Redis PING 返回异常: {response}");
            error!("{}", message);
            return Err(FleetError::Store(message));
        }
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        self.ping().await.is_ok()
    }
}

/// 阻塞连接数量，至少保留一条
fn blocking_pool_size(configured: usize) -> usize {
    configured.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_pool_size_keeps_one_connection() {
        assert_eq!(blocking_pool_size(0), 1);
        assert_eq!(blocking_pool_size(1), 1);
        assert_eq!(blocking_pool_size(6), 6);
    }
}
