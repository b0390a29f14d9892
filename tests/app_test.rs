use std::sync::Arc;
use std::time::Duration;

use fleet_config::{AppConfig, JobDefinition};
use fleet_domain::{keys, CoordinationStore, ExecutionStatus};
use fleet_infrastructure::InMemoryCoordinationStore;
use fleet_scheduler::{join_all_with_timeout, ApplicationBuilder, ShutdownManager};
use fleet_testing_utils::{wait_until, RecordingLogSink, ScriptedJobInvoker};

const NODE_ID: &str = "127.0.0.1:app-test";

fn every_second_job(id: i64, name: &str) -> JobDefinition {
    JobDefinition {
        id,
        name: name.to_string(),
        group: "DEFAULT".to_string(),
        cron: "* * * * * *".to_string(),
        invoke_target: "true".to_string(),
        priority: "NORMAL".to_string(),
        requires_master: false,
        max_retries: None,
        timeout_seconds: None,
    }
}

fn test_config(jobs: Vec<JobDefinition>) -> AppConfig {
    let mut config = AppConfig::default();
    config.node.node_id = Some(NODE_ID.to_string());
    config.jobs = jobs;
    config
}

#[tokio::test]
async fn test_application_fires_registers_and_deregisters() {
    let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
    let invoker = Arc::new(ScriptedJobInvoker::new());
    let sink = Arc::new(RecordingLogSink::new());

    let app = ApplicationBuilder::new(test_config(vec![every_second_job(1, "tick")]))
        .with_store(Arc::clone(&store))
        .with_invoker(invoker.clone())
        .with_log_sink(sink.clone())
        .build()
        .await
        .expect("build application");
    assert_eq!(app.node_id(), NODE_ID);

    let shutdown = ShutdownManager::new();
    let handles = app.start(&shutdown).await;

    let members = store.set_members(keys::SCHEDULER_NODES).await.unwrap();
    assert_eq!(members, vec![NODE_ID.to_string()]);
    assert_eq!(
        store.get(keys::SCHEDULER_MASTER).await.unwrap().as_deref(),
        Some(NODE_ID)
    );
    assert_eq!(
        store.get(&keys::job_master_node(1)).await.unwrap().as_deref(),
        Some("0")
    );

    let fired = wait_until(Duration::from_secs(4), || {
        let invoker = invoker.clone();
        async move { invoker.invocation_count() >= 1 }
    })
    .await;
    assert!(fired, "cron job should fire within a few seconds");

    let completed = wait_until(Duration::from_secs(2), || {
        let sink = sink.clone();
        async move {
            sink.completions()
                .iter()
                .any(|(_, status)| *status == ExecutionStatus::Succeeded)
        }
    })
    .await;
    assert!(completed);
    assert!(invoker
        .invocations()
        .iter()
        .all(|(job_key, _)| job_key == "1.tick"));

    shutdown.shutdown();
    assert!(join_all_with_timeout(handles, Duration::from_secs(5)).await);
    app.stop().await;

    assert!(store.set_members(keys::SCHEDULER_NODES).await.unwrap().is_empty());
    assert!(store.get(keys::SCHEDULER_MASTER).await.unwrap().is_none());
    assert!(store.get(&keys::node_heartbeat(NODE_ID)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_build_rejects_malformed_node_id() {
    let mut config = test_config(Vec::new());
    config.node.node_id = Some("no-separator".to_string());

    let result = ApplicationBuilder::new(config)
        .with_store(Arc::new(InMemoryCoordinationStore::new()))
        .build()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_build_rejects_invalid_cron() {
    let mut job = every_second_job(9, "broken");
    job.cron = "every minute".to_string();

    let result = ApplicationBuilder::new(test_config(vec![job]))
        .with_store(Arc::new(InMemoryCoordinationStore::new()))
        .build()
        .await;
    let err = result.err().expect("invalid cron must fail");
    assert!(format!("{err:#}").contains("cron"));
}
