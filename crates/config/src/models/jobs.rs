use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

/// 宿主进程驱动的定时任务定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobDefinition {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// 六段或七段cron表达式（秒 分 时 日 月 周 [年]）
    pub cron: String,
    /// shell命令
    pub invoke_target: String,
    /// HIGH / NORMAL
    #[serde(default = "default_priority")]
    pub priority: String,
    /// 是否只允许主节点执行
    #[serde(default)]
    pub requires_master: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

fn default_group() -> String {
    "DEFAULT".to_string()
}

fn default_priority() -> String {
    "NORMAL".to_string()
}

impl ConfigValidator for JobDefinition {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "jobs.name")?;
        ValidationUtils::validate_not_empty(&self.cron, "jobs.cron")?;
        ValidationUtils::validate_not_empty(&self.invoke_target, "jobs.invoke_target")?;
        if !matches!(self.priority.to_uppercase().as_str(), "HIGH" | "NORMAL") {
            return Err(crate::ConfigError::Validation(format!(
                "任务 {} 的优先级无效: {}",
                self.name, self.priority
            )));
        }
        if let Some(timeout) = self.timeout_seconds {
            ValidationUtils::validate_seconds(timeout, "jobs.timeout_seconds")?;
        }
        Ok(())
    }
}
