use std::net::SocketAddr;

use anyhow::{anyhow, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 在指定地址暴露Prometheus抓取端点，必须在tokio运行时内调用
pub fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow!("无效的指标监听地址 {listen}: {e}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow!("Prometheus导出器安装失败: {e}"))?;

    metrics::describe_counter!("fleet_guard_fires_total", "执行守卫处理的触发次数");
    metrics::describe_counter!("fleet_queue_enqueued_total", "入队消息数");
    metrics::describe_counter!("fleet_queue_reclaimed_total", "回收的超时处理中消息数");
    metrics::describe_gauge!("fleet_node_load", "本节点执行槽位占用率");

    info!("Prometheus指标导出已启动: {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_listen_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
