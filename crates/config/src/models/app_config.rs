use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    cluster::{ElectionConfig, LoadConfig, LockConfig, MonitorConfig, NodeConfig},
    jobs::JobDefinition,
    observability::ObservabilityConfig,
    queue::{DistributorConfig, GuardConfig, QueueConfig},
    redis::RedisConfig,
};
use crate::validation::ConfigValidator;

/// 环境变量前缀，例如 `FLEET__QUEUE__CONSUMER_COUNT=8`
pub const ENV_PREFIX: &str = "FLEET";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub node: NodeConfig,
    pub monitor: MonitorConfig,
    pub election: ElectionConfig,
    pub load: LoadConfig,
    pub lock: LockConfig,
    pub distributor: DistributorConfig,
    pub queue: QueueConfig,
    pub guard: GuardConfig,
    pub observability: ObservabilityConfig,
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    /// 默认值 → TOML文件 → `FLEET__` 环境变量，依次覆盖
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/fleet.toml", "fleet.toml", "/etc/fleet/fleet.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.redis.validate()?;
        self.node.validate()?;
        self.monitor.validate()?;
        self.election.validate()?;
        self.load.validate()?;
        self.lock.validate()?;
        self.distributor.validate()?;
        self.queue.validate()?;
        self.guard.validate()?;
        self.observability.validate()?;

        // 心跳在离线阈值内至少要刷新一次
        if self.monitor.offline_threshold_seconds <= self.node.heartbeat_interval_seconds {
            return Err(crate::ConfigError::Validation(format!(
                "monitor.offline_threshold_seconds({}) 必须大于 node.heartbeat_interval_seconds({})",
                self.monitor.offline_threshold_seconds, self.node.heartbeat_interval_seconds
            )));
        }

        // 每个消费者阻塞等待时独占一条连接，不够时会在锁上排队超出弹出超时
        if self.redis.blocking_connections < self.queue.consumer_count {
            return Err(crate::ConfigError::Validation(format!(
                "redis.blocking_connections({}) 不能小于 queue.consumer_count({})",
                self.redis.blocking_connections, self.queue.consumer_count
            )));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            job.validate()?;
            if !seen.insert(job.id) {
                return Err(crate::ConfigError::Validation(format!(
                    "任务ID重复: {}",
                    job.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.node.heartbeat_interval_seconds, 30);
        assert_eq!(config.node.heartbeat_ttl_seconds, 300);
        assert_eq!(config.monitor.offline_threshold_seconds, 120);
        assert_eq!(config.election.lease_ttl_seconds, 60);
        assert_eq!(config.distributor.load_threshold, 0.8);
        assert_eq!(config.queue.backoff_cap_ms, 60_000);
        assert!(config.jobs.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[redis]
host = "redis.internal"

[distributor]
load_threshold = 0.7

[[jobs]]
id = 1
name = "stock-sync"
cron = "0 */5 * * * *"
invoke_target = "echo sync"
requires_master = true
max_retries = 3
"#;
        let config = AppConfig::from_toml(toml_str).expect("partial toml should load");
        assert_eq!(config.redis.host, "redis.internal");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.distributor.load_threshold, 0.7);
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].group, "DEFAULT");
        assert_eq!(config.jobs[0].priority, "NORMAL");
        assert!(config.jobs[0].requires_master);
    }

    #[test]
    fn test_duplicate_job_ids_rejected() {
        let toml_str = r#"
[[jobs]]
id = 1
name = "a"
cron = "* * * * * *"
invoke_target = "true"

[[jobs]]
id = 1
name = "b"
cron = "* * * * * *"
invoke_target = "true"
"#;
        let err = AppConfig::from_toml(toml_str).unwrap_err();
        assert!(format!("{err:#}").contains("任务ID重复"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        writeln!(
            file,
            "[redis]\nblocking_connections = 8\n\n[queue]\nconsumer_count = 8\n\n[monitor]\noffline_threshold_seconds = 90"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.queue.consumer_count, 8);
        assert_eq!(config.monitor.offline_threshold_seconds, 90);
        assert_eq!(config.queue.promotion_batch, 50);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/fleet.toml")).is_err());
    }

    #[test]
    fn test_offline_threshold_must_exceed_heartbeat() {
        let mut config = AppConfig::default();
        config.monitor.offline_threshold_seconds = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_blocking_connections_cover_consumers() {
        let mut config = AppConfig::default();
        config.queue.consumer_count = 8;
        config.redis.blocking_connections = 4;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis.blocking_connections"));

        config.redis.blocking_connections = 8;
        assert!(config.validate().is_ok());
    }
}
