use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// pretty / json / compact
    pub log_format: String,
    /// Prometheus 导出地址，例如 `0.0.0.0:9100`，为空则不启动
    pub metrics_listen: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_listen: None,
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "无效的日志级别: {}，可选值: {:?}",
                self.log_level, valid_levels
            )));
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(crate::ConfigError::Validation(format!(
                "无效的日志格式: {}，可选值: {:?}",
                self.log_format, valid_formats
            )));
        }

        if let Some(listen) = &self.metrics_listen {
            ValidationUtils::validate_not_empty(listen, "observability.metrics_listen")?;
            listen.parse::<std::net::SocketAddr>().map_err(|e| {
                crate::ConfigError::Validation(format!(
                    "observability.metrics_listen 不是有效地址 {listen}: {e}"
                ))
            })?;
        }
        Ok(())
    }
}
