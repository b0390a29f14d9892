//! Test container utilities for integration testing

use anyhow::Result;
use fleet_config::RedisConfig;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::redis::Redis;

/// 一次性的Redis容器，随值释放而销毁
pub struct RedisTestContainer {
    #[allow(dead_code)]
    container: ContainerAsync<Redis>,
    port: u16,
}

impl RedisTestContainer {
    pub async fn start() -> Result<Self> {
        let container = Redis::default().start().await?;
        let port = container.get_host_port_ipv4(6379).await?;
        Ok(Self { container, port })
    }

    pub fn config(&self) -> RedisConfig {
        RedisConfig {
            host: "127.0.0.1".to_string(),
            port: self.port,
            blocking_connections: 2,
            ..RedisConfig::default()
        }
    }
}
