/// 重试退避：`min(cap, base * 2^retry_count)`，不限制次数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            cap_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        self.base_ms.saturating_mul(factor).min(self.cap_ms)
    }
}

/// 默认参数下的退避时长
pub fn backoff_delay_ms(retry_count: u32) -> u64 {
    BackoffPolicy::default().delay_ms(retry_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (0..7).map(backoff_delay_ms).collect();
        assert_eq!(delays, vec![2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000]);
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let mut previous = 0;
        for retry_count in 0..=200 {
            let delay = backoff_delay_ms(retry_count);
            assert!(delay >= previous, "retry {retry_count} 退避变小");
            assert!(delay <= 60_000);
            previous = delay;
        }
    }

    #[test]
    fn test_custom_policy() {
        let policy = BackoffPolicy {
            base_ms: 100,
            cap_ms: 1_000,
        };
        assert_eq!(policy.delay_ms(0), 100);
        assert_eq!(policy.delay_ms(3), 800);
        assert_eq!(policy.delay_ms(4), 1_000);
    }
}
