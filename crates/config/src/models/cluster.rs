use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 本节点身份与心跳
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// 固定节点ID，未设置时按 `<ip>:<uuid>` 生成
    pub node_id: Option<String>,
    /// 固定对外IP，未设置时自动探测
    pub ip: Option<String>,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_ttl_seconds: u64,
    pub membership_ttl_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            ip: None,
            heartbeat_interval_seconds: 30,
            heartbeat_ttl_seconds: 300,
            membership_ttl_seconds: 300,
        }
    }
}

impl NodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_secs(self.heartbeat_ttl_seconds)
    }

    pub fn membership_ttl(&self) -> Duration {
        Duration::from_secs(self.membership_ttl_seconds)
    }
}

impl ConfigValidator for NodeConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        if let Some(node_id) = &self.node_id {
            ValidationUtils::validate_not_empty(node_id, "node.node_id")?;
        }
        ValidationUtils::validate_seconds(
            self.heartbeat_interval_seconds,
            "node.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_seconds(self.heartbeat_ttl_seconds, "node.heartbeat_ttl_seconds")?;
        ValidationUtils::validate_seconds(
            self.membership_ttl_seconds,
            "node.membership_ttl_seconds",
        )?;
        ValidationUtils::validate_ttl_exceeds(
            self.heartbeat_ttl_seconds,
            self.heartbeat_interval_seconds,
            "node.heartbeat_ttl_seconds",
            "node.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_ttl_exceeds(
            self.membership_ttl_seconds,
            self.heartbeat_interval_seconds,
            "node.membership_ttl_seconds",
            "node.heartbeat_interval_seconds",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_seconds: u64,
    pub offline_threshold_seconds: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            offline_threshold_seconds: 120,
        }
    }
}

impl ConfigValidator for MonitorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.interval_seconds, "monitor.interval_seconds")?;
        ValidationUtils::validate_seconds(
            self.offline_threshold_seconds,
            "monitor.offline_threshold_seconds",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub interval_seconds: u64,
    pub lease_ttl_seconds: u64,
    pub election_lock_ttl_seconds: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            lease_ttl_seconds: 60,
            election_lock_ttl_seconds: 10,
        }
    }
}

impl ConfigValidator for ElectionConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.interval_seconds, "election.interval_seconds")?;
        ValidationUtils::validate_seconds(self.lease_ttl_seconds, "election.lease_ttl_seconds")?;
        ValidationUtils::validate_seconds(
            self.election_lock_ttl_seconds,
            "election.election_lock_ttl_seconds",
        )?;
        ValidationUtils::validate_ttl_exceeds(
            self.lease_ttl_seconds,
            self.interval_seconds,
            "election.lease_ttl_seconds",
            "election.interval_seconds",
        )
    }
}

/// 负载上报
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub report_interval_seconds: u64,
    pub usage_ttl_seconds: u64,
    /// 本地执行槽位数，负载 = 活跃数 / 槽位数
    pub pool_size: usize,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            report_interval_seconds: 10,
            usage_ttl_seconds: 60,
            pool_size: 10,
        }
    }
}

impl ConfigValidator for LoadConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(
            self.report_interval_seconds,
            "load.report_interval_seconds",
        )?;
        ValidationUtils::validate_seconds(self.usage_ttl_seconds, "load.usage_ttl_seconds")?;
        ValidationUtils::validate_count(self.pool_size, "load.pool_size", 10_000)?;
        ValidationUtils::validate_ttl_exceeds(
            self.usage_ttl_seconds,
            self.report_interval_seconds,
            "load.usage_ttl_seconds",
            "load.report_interval_seconds",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_seconds: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 60,
        }
    }
}

impl ConfigValidator for LockConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.default_ttl_seconds, "lock.default_ttl_seconds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_ttl_must_exceed_interval() {
        let config = NodeConfig {
            heartbeat_ttl_seconds: 20,
            ..NodeConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("node.heartbeat_ttl_seconds"));
    }

    #[test]
    fn test_election_defaults_are_valid() {
        assert!(ElectionConfig::default().validate().is_ok());
        assert!(MonitorConfig::default().validate().is_ok());
        assert!(LoadConfig::default().validate().is_ok());
        assert!(LockConfig::default().validate().is_ok());
    }
}
