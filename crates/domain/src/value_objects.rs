use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 任务优先级，消费者总是先取 HIGH 再取 NORMAL
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }

    /// 消费顺序
    pub fn drain_order() -> [Priority; 2] {
        [Priority::High, Priority::Normal]
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            other => Err(format!("未知的优先级: {other}")),
        }
    }
}

/// 0.0 ~ 1.0 之间的负载值
///
/// 缺失的负载按 1.0 处理，避免把任务压到状态未知的节点上。
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct LoadMetric(f64);

impl LoadMetric {
    pub const UNKNOWN: LoadMetric = LoadMetric(1.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::UNKNOWN;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn from_ratio(active: usize, size: usize) -> Self {
        if size == 0 {
            Self(0.0)
        } else {
            Self::new(active as f64 / size as f64)
        }
    }

    /// 解析存储中的字符串，无法解析或缺失时视为满载
    pub fn parse_or_unknown(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse::<f64>().ok())
            .map(Self::new)
            .unwrap_or(Self::UNKNOWN)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for LoadMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}
