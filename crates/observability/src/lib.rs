//! 日志与指标初始化

pub mod logging;
pub mod metrics_exporter;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics_exporter::init_metrics;
