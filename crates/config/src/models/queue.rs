use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 可靠任务队列
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub consumer_count: usize,
    pub promotion_interval_ms: u64,
    pub promotion_batch: usize,
    pub pop_timeout_seconds: u64,
    pub reclaim_interval_seconds: u64,
    pub reclaim_window: usize,
    pub stale_timeout_seconds: u64,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub inflight_marker_ttl_seconds: u64,
    /// `task:monitor:recent` 保留条数
    pub recent_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            consumer_count: 4,
            promotion_interval_ms: 1_000,
            promotion_batch: 50,
            pop_timeout_seconds: 2,
            reclaim_interval_seconds: 10,
            reclaim_window: 100,
            stale_timeout_seconds: 30,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 60_000,
            inflight_marker_ttl_seconds: 300,
            recent_history: 50,
        }
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_count(self.consumer_count, "queue.consumer_count", 256)?;
        if self.promotion_interval_ms == 0 {
            return Err(crate::ConfigError::Validation(
                "queue.promotion_interval_ms 必须大于0".to_string(),
            ));
        }
        ValidationUtils::validate_count(self.promotion_batch, "queue.promotion_batch", 10_000)?;
        ValidationUtils::validate_seconds(self.pop_timeout_seconds, "queue.pop_timeout_seconds")?;
        ValidationUtils::validate_seconds(
            self.reclaim_interval_seconds,
            "queue.reclaim_interval_seconds",
        )?;
        ValidationUtils::validate_count(self.reclaim_window, "queue.reclaim_window", 10_000)?;
        ValidationUtils::validate_seconds(
            self.stale_timeout_seconds,
            "queue.stale_timeout_seconds",
        )?;
        ValidationUtils::validate_seconds(
            self.inflight_marker_ttl_seconds,
            "queue.inflight_marker_ttl_seconds",
        )?;
        ValidationUtils::validate_count(self.recent_history, "queue.recent_history", 10_000)?;
        if self.backoff_base_ms == 0 || self.backoff_cap_ms < self.backoff_base_ms {
            return Err(crate::ConfigError::Validation(format!(
                "queue.backoff_base_ms({}) 必须大于0且不超过 queue.backoff_cap_ms({})",
                self.backoff_base_ms, self.backoff_cap_ms
            )));
        }
        Ok(())
    }
}

/// 任务分发
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub load_threshold: f64,
    pub distributed_marker_ttl_seconds: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            load_threshold: 0.8,
            distributed_marker_ttl_seconds: 300,
        }
    }
}

impl ConfigValidator for DistributorConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_ratio(self.load_threshold, "distributor.load_threshold")?;
        ValidationUtils::validate_seconds(
            self.distributed_marker_ttl_seconds,
            "distributor.distributed_marker_ttl_seconds",
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub fire_lock_ttl_seconds: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            fire_lock_ttl_seconds: 60,
        }
    }
}

impl ConfigValidator for GuardConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_seconds(self.fire_lock_ttl_seconds, "guard.fire_lock_ttl_seconds")
    }
}
