use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use fleet_config::AppConfig;
use fleet_infrastructure::InMemoryCoordinationStore;
use fleet_observability::{init_logging, init_metrics, LogFormat, LoggingConfig};
use fleet_scheduler::{join_all_with_timeout, wait_for_shutdown_signal, ApplicationBuilder, ShutdownManager};
use tracing::{info, warn};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("fleet-node")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式定时任务协调节点")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/fleet.toml、fleet.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["pretty", "json", "compact"]),
        )
        .arg(
            Arg::new("node-id")
                .long("node-id")
                .value_name("ID")
                .help("节点ID，格式 <ip>:<后缀>"),
        )
        .arg(
            Arg::new("in-memory")
                .long("in-memory")
                .help("使用进程内协调存储，仅用于单机调试")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    if let Some(node_id) = matches.get_one::<String>("node-id") {
        config.node.node_id = Some(node_id.clone());
    }

    init_logging(&LoggingConfig {
        level: config.observability.log_level.clone(),
        format: config.observability.log_format.parse::<LogFormat>()?,
        ..LoggingConfig::default()
    })?;

    if let Some(listen) = &config.observability.metrics_listen {
        init_metrics(listen)?;
        info!("Prometheus指标监听于 {}", listen);
    }

    let mut builder = ApplicationBuilder::new(config);
    if matches.get_flag("in-memory") {
        warn!("使用进程内协调存储，节点之间不会互相可见");
        builder = builder.with_store(Arc::new(InMemoryCoordinationStore::new()));
    }
    let app = builder.build().await?;
    info!("节点 {} 启动", app.node_id());

    let shutdown_manager = ShutdownManager::new();
    let handles = app.start(&shutdown_manager).await;

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown();

    if !join_all_with_timeout(handles, SHUTDOWN_TIMEOUT).await {
        warn!("部分后台任务未在 {:?} 内退出", SHUTDOWN_TIMEOUT);
    }
    app.stop().await;

    info!("节点已退出");
    Ok(())
}
