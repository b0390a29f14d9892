use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    /// 阻塞式弹出（BLMOVE）专用连接数，通常等于消费者数量
    pub blocking_connections: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 5,
            blocking_connections: 4,
        }
    }
}

impl RedisConfig {
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl ConfigValidator for RedisConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.host, "redis.host")?;
        ValidationUtils::validate_port(self.port, "redis.port")?;
        ValidationUtils::validate_seconds(
            self.connection_timeout_seconds,
            "redis.connection_timeout_seconds",
        )?;
        ValidationUtils::validate_count(self.blocking_connections, "redis.blocking_connections", 256)?;
        if self.database < 0 {
            return Err(crate::ConfigError::Validation(
                "redis.database 不能为负数".to_string(),
            ));
        }
        Ok(())
    }
}
