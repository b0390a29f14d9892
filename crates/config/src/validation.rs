use crate::{ConfigError, ConfigResult};

pub trait ConfigValidator {
    fn validate(&self) -> ConfigResult<()>;
}

/// General validation utilities
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field_name} 不能为空")));
        }
        Ok(())
    }

    pub fn validate_port(port: u16, field_name: &str) -> ConfigResult<()> {
        if port == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 不能为0")));
        }
        Ok(())
    }

    /// 周期或TTL，单位秒，必须在 (0, 3600] 之间
    pub fn validate_seconds(value: u64, field_name: &str) -> ConfigResult<()> {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        if value > 3600 {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过3600秒"
            )));
        }
        Ok(())
    }

    pub fn validate_count(count: usize, field_name: &str, max: usize) -> ConfigResult<()> {
        if count == 0 {
            return Err(ConfigError::Validation(format!("{field_name} 必须大于0")));
        }
        if count > max {
            return Err(ConfigError::Validation(format!(
                "{field_name} 不能超过 {max}"
            )));
        }
        Ok(())
    }

    pub fn validate_ratio(value: f64, field_name: &str) -> ConfigResult<()> {
        if !(value > 0.0 && value <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "{field_name} 必须在 (0, 1] 区间内，当前值 {value}"
            )));
        }
        Ok(())
    }

    /// TTL必须严格大于刷新周期，否则一次正常刷新之间键就会过期
    pub fn validate_ttl_exceeds(
        ttl: u64,
        period: u64,
        ttl_field: &str,
        period_field: &str,
    ) -> ConfigResult<()> {
        if ttl <= period {
            return Err(ConfigError::Validation(format!(
                "{ttl_field}({ttl}) 必须大于 {period_field}({period})"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_not_empty() {
        assert!(ValidationUtils::validate_not_empty("redis", "redis.host").is_ok());
        assert!(ValidationUtils::validate_not_empty("   ", "redis.host").is_err());
    }

    #[test]
    fn test_validate_seconds() {
        assert!(ValidationUtils::validate_seconds(30, "x").is_ok());
        assert!(ValidationUtils::validate_seconds(3600, "x").is_ok());
        assert!(ValidationUtils::validate_seconds(0, "x").is_err());
        assert!(ValidationUtils::validate_seconds(3601, "x").is_err());
    }

    #[test]
    fn test_validate_ratio() {
        assert!(ValidationUtils::validate_ratio(0.8, "t").is_ok());
        assert!(ValidationUtils::validate_ratio(1.0, "t").is_ok());
        assert!(ValidationUtils::validate_ratio(0.0, "t").is_err());
        assert!(ValidationUtils::validate_ratio(1.5, "t").is_err());
        assert!(ValidationUtils::validate_ratio(f64::NAN, "t").is_err());
    }

    #[test]
    fn test_validate_ttl_exceeds() {
        assert!(ValidationUtils::validate_ttl_exceeds(300, 30, "ttl", "interval").is_ok());
        let err = ValidationUtils::validate_ttl_exceeds(30, 30, "ttl", "interval").unwrap_err();
        assert!(err.to_string().contains("ttl(30)"));
    }
}
