use std::sync::Arc;
use std::time::Duration;

use fleet_cluster::{NodeMonitor, NodeMonitorConfig, NodeQueueDrain, PoolUsage};
use fleet_domain::{keys, now_millis, CoordinationStore, ExecutionStatus, Priority};
use fleet_infrastructure::InMemoryCoordinationStore;
use fleet_queue::{
    CompletionStatus, DurableTaskQueue, DurableTaskQueueConfig, EnqueueOutcome, ExecutionOrigin,
    QueueWorker, QueueWorkerConfig,
};
use fleet_testing_utils::{
    seed_node, wait_until, JobMetadataBuilder, RecordingLogSink, ScriptedJobInvoker,
    ScriptedOutcome, TaskMessageBuilder,
};
use tokio::sync::broadcast;

const NODE: &str = "node-1";

fn setup(node_id: &str) -> (Arc<InMemoryCoordinationStore>, Arc<DurableTaskQueue>) {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let queue = Arc::new(DurableTaskQueue::new(
        store.clone(),
        node_id,
        DurableTaskQueueConfig::default(),
    ));
    (store, queue)
}

fn worker_for(
    queue: &Arc<DurableTaskQueue>,
    invoker: &ScriptedJobInvoker,
    sink: &RecordingLogSink,
) -> Arc<QueueWorker> {
    Arc::new(QueueWorker::new(
        Arc::clone(queue),
        Arc::new(invoker.clone()),
        Arc::new(sink.clone()),
        PoolUsage::new(4),
        QueueWorkerConfig {
            consumer_count: 2,
            pop_timeout: Duration::from_millis(50),
            promotion_interval: Duration::from_millis(20),
            reclaim_interval: Duration::from_millis(50),
            error_backoff: Duration::from_millis(20),
        },
    ))
}

#[tokio::test]
async fn test_delayed_message_promoted_only_when_due() {
    let (store, queue) = setup(NODE);
    let now = 1_000_000;
    let msg = TaskMessageBuilder::new("1.report").scheduled_at(now + 5_000).build();

    let outcome = queue.enqueue_at(&msg, now).await.unwrap();
    assert_eq!(outcome, EnqueueOutcome::Delayed);
    assert_eq!(store.sorted_len(&keys::delay_queue(NODE)).await.unwrap(), 1);

    assert_eq!(queue.promote_due_at(NODE, now + 4_999).await.unwrap(), 0);
    assert_eq!(queue.promote_due_at(NODE, now + 5_000).await.unwrap(), 1);
    assert_eq!(queue.promote_due_at(NODE, now + 5_000).await.unwrap(), 0);

    let delivery = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(delivery.message, msg);
    assert_eq!(store.sorted_len(&keys::delay_queue(NODE)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_nack_backoff_doubles_per_retry() {
    let (store, queue) = setup(NODE);
    let msg = TaskMessageBuilder::new("2.flaky").scheduled_at(0).enqueued_at(0).build();
    queue.enqueue_at(&msg, 0).await.unwrap();

    let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    let t1 = 10_000;
    assert_eq!(queue.nack_at(&first, t1, "boom").await.unwrap(), Some(t1 + 2_000));
    assert_eq!(store.list_len(&keys::processing_queue(NODE)).await.unwrap(), 0);
    assert!(store
        .sorted_range_by_score(&keys::delay_queue(NODE), t1 + 1_999, 10)
        .await
        .unwrap()
        .is_empty());

    assert_eq!(queue.promote_due_at(NODE, t1 + 2_000).await.unwrap(), 1);
    let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(second.message.retry_count, 1);
    assert_eq!(second.message.execution_id, msg.execution_id);

    let t2 = t1 + 2_500;
    assert_eq!(queue.nack_at(&second, t2, "boom").await.unwrap(), Some(t2 + 4_000));

    let recent = queue.recent_completions(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().all(|r| r.status == CompletionStatus::Retry));
    assert_eq!(recent[0].retry_count, 2);
}

#[tokio::test]
async fn test_ack_clears_processing_and_markers() {
    let (store, queue) = setup(NODE);
    let msg = TaskMessageBuilder::new("3.ok").build();
    queue.enqueue(&msg).await.unwrap();

    let delivery = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert!(queue.is_task_in_flight("3.ok").await.unwrap());
    assert_eq!(
        store.get(&keys::inflight_marker("3.ok")).await.unwrap().as_deref(),
        Some(NODE)
    );

    assert!(queue.ack(&delivery).await.unwrap());
    assert!(!queue.is_task_in_flight("3.ok").await.unwrap());
    let stats = queue.stats(NODE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.normal, 0);

    let recent = queue.recent_completions(5).await.unwrap();
    assert_eq!(recent[0].status, CompletionStatus::Success);
    assert_eq!(recent[0].node_id, NODE);
}

#[tokio::test]
async fn test_pop_prefers_high_then_global() {
    let (store, queue) = setup(NODE);
    let own_normal = TaskMessageBuilder::new("own-normal").build();
    let own_high = TaskMessageBuilder::new("own-high")
        .with_priority(Priority::High)
        .build();
    let global_high = TaskMessageBuilder::new("global-high")
        .with_target("node-9")
        .with_priority(Priority::High)
        .build();
    let global_normal = TaskMessageBuilder::new("global-normal")
        .with_target("node-9")
        .build();

    queue.enqueue(&own_normal).await.unwrap();
    queue.enqueue(&own_high).await.unwrap();
    store
        .list_push_front(
            &keys::global_ready_queue(Priority::Normal),
            &global_normal.to_json().unwrap(),
        )
        .await
        .unwrap();
    store
        .list_push_front(
            &keys::global_ready_queue(Priority::High),
            &global_high.to_json().unwrap(),
        )
        .await
        .unwrap();

    let mut order = Vec::new();
    while let Some(delivery) = queue.pop(Duration::from_millis(10)).await.unwrap() {
        order.push(delivery.message.task_id);
    }
    assert_eq!(order, vec!["own-high", "global-high", "own-normal", "global-normal"]);
    assert_eq!(store.list_len(&keys::processing_queue(NODE)).await.unwrap(), 4);
}

#[tokio::test]
async fn test_ready_list_is_fifo() {
    let (_store, queue) = setup(NODE);
    for id in ["a", "b", "c"] {
        queue
            .enqueue(&TaskMessageBuilder::new(id).build())
            .await
            .unwrap();
    }
    let mut seen = Vec::new();
    while let Some(delivery) = queue.pop(Duration::from_millis(10)).await.unwrap() {
        seen.push(delivery.message.task_id);
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_reclaim_stale_message_exactly_once() {
    let (store, queue) = setup(NODE);
    let msg = TaskMessageBuilder::new("4.stuck")
        .scheduled_at(1_000)
        .enqueued_at(1_000)
        .build();
    queue.enqueue_at(&msg, 2_000).await.unwrap();
    let delivery = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();

    assert_eq!(queue.reclaim_stale_at(NODE, 31_000, |_| false).await.unwrap(), 0);
    assert_eq!(queue.reclaim_stale_at(NODE, 31_001, |_| false).await.unwrap(), 1);
    assert_eq!(queue.reclaim_stale_at(NODE, 31_001, |_| false).await.unwrap(), 0);

    let stats = queue.stats(NODE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.normal, 1);

    let again = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(again.message.scheduled_at, 31_001);
    assert_eq!(again.message.retry_count, 0);

    // 原执行者晚到的重试不再写入
    assert_eq!(queue.nack_at(&delivery, 40_000, "late").await.unwrap(), None);
    assert_eq!(store.sorted_len(&keys::delay_queue(NODE)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_reclaim_skips_locally_executing_task() {
    let (_store, queue) = setup(NODE);
    let msg = TaskMessageBuilder::new("5.long")
        .scheduled_at(0)
        .enqueued_at(0)
        .build();
    queue.enqueue_at(&msg, 0).await.unwrap();
    queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();

    let reclaimed = queue
        .reclaim_stale_at(NODE, 1_000_000, |task_id| task_id == "5.long")
        .await
        .unwrap();
    assert_eq!(reclaimed, 0);
    assert_eq!(queue.stats(NODE).await.unwrap().processing, 1);
}

#[tokio::test]
async fn test_evicted_node_queue_moves_to_global_lists() {
    let (store, queue) = setup(NODE);
    let dead = "10.0.0.9:dead";
    seed_node(store.as_ref(), dead, Some(0), Some(0.1)).await.unwrap();

    let high = TaskMessageBuilder::new("h").with_target(dead).with_priority(Priority::High).build();
    let normal = TaskMessageBuilder::new("n").with_target(dead).build();
    let delayed = TaskMessageBuilder::new("d")
        .with_target(dead)
        .scheduled_at(now_millis() + 3_600_000)
        .build();
    let processing = TaskMessageBuilder::new("p").with_target(dead).build();
    queue.enqueue(&high).await.unwrap();
    queue.enqueue(&normal).await.unwrap();
    queue.enqueue(&delayed).await.unwrap();
    store
        .list_push_front(&keys::processing_queue(dead), &processing.to_json().unwrap())
        .await
        .unwrap();

    let drain: Arc<dyn NodeQueueDrain> = queue.clone();
    let monitor = NodeMonitor::new(store.clone(), drain, NODE, NodeMonitorConfig::default());
    let evicted = monitor.check_nodes_at(now_millis()).await.unwrap();
    assert_eq!(evicted, vec![dead.to_string()]);

    assert!(!store.set_contains(keys::SCHEDULER_NODES, dead).await.unwrap());
    assert!(!store.exists(&keys::node_heartbeat(dead)).await.unwrap());
    let dead_stats = queue.stats(dead).await.unwrap();
    assert_eq!(
        (dead_stats.high, dead_stats.normal, dead_stats.delayed, dead_stats.processing),
        (0, 0, 0, 0)
    );
    assert_eq!(dead_stats.global_high, 1);
    assert_eq!(dead_stats.global_normal, 3);

    // 存活节点从全局队列接手，HIGH优先
    let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(first.message.task_id, "h");
    let mut rest = Vec::new();
    while let Some(delivery) = queue.pop(Duration::from_millis(10)).await.unwrap() {
        rest.push(delivery.message.task_id);
    }
    rest.sort();
    assert_eq!(rest, vec!["d", "n", "p"]);
}

#[tokio::test]
async fn test_drain_is_noop_for_empty_node() {
    let (_store, queue) = setup(NODE);
    assert_eq!(queue.drain_node("ghost").await.unwrap(), 0);
}

#[tokio::test]
async fn test_worker_success_acks_and_logs() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().with_id(7).with_name("sync").build();
    let msg = TaskMessageBuilder::for_job(&job).build();
    queue.enqueue(&msg).await.unwrap();

    assert!(worker.poll_once().await.unwrap());
    assert_eq!(invoker.invocations(), vec![("7.sync".to_string(), msg.trace_id.clone())]);
    assert_eq!(sink.starts().len(), 1);
    assert_eq!(sink.completions()[0].1, ExecutionStatus::Succeeded);
    assert_eq!(sink.labels(), vec!["succeeded"]);
    assert_eq!(queue.stats(NODE).await.unwrap().processing, 0);
    assert!(worker.executing().is_empty());

    assert!(!worker.poll_once().await.unwrap());
}

#[tokio::test]
async fn test_worker_respects_payload_retry_ceiling() {
    let (store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::with_script(vec![
        ScriptedOutcome::Fail("first".into()),
        ScriptedOutcome::Fail("second".into()),
    ]);
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().with_max_retries(1).build();
    queue
        .enqueue(&TaskMessageBuilder::for_job(&job).build())
        .await
        .unwrap();

    assert!(worker.poll_once().await.unwrap());
    assert_eq!(store.sorted_len(&keys::delay_queue(NODE)).await.unwrap(), 1);

    queue
        .promote_due_at(NODE, now_millis() + 60_000)
        .await
        .unwrap();
    assert!(worker.poll_once().await.unwrap());

    assert_eq!(invoker.invocation_count(), 2);
    let stats = queue.stats(NODE).await.unwrap();
    assert_eq!((stats.delayed, stats.processing, stats.normal), (0, 0, 0));

    let recent = queue.recent_completions(10).await.unwrap();
    assert_eq!(recent[0].status, CompletionStatus::Failed);
    assert_eq!(recent[1].status, CompletionStatus::Retry);
    assert_eq!(sink.labels(), vec!["failed", "failed"]);
    assert!(sink.entries()[0].message.is_some());
}

#[tokio::test]
async fn test_worker_turns_panic_into_retry() {
    let (store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::with_script(vec![ScriptedOutcome::Panic("kaboom".into())]);
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().build();
    queue
        .enqueue(&TaskMessageBuilder::for_job(&job).build())
        .await
        .unwrap();

    assert!(worker.poll_once().await.unwrap());
    assert_eq!(store.sorted_len(&keys::delay_queue(NODE)).await.unwrap(), 1);
    match &sink.completions()[0].1 {
        ExecutionStatus::Failed { error } => assert!(error.contains("kaboom")),
        other => panic!("unexpected status {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_fails_undecodable_payload() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    queue
        .enqueue(&TaskMessageBuilder::new("no-payload").build())
        .await
        .unwrap();
    assert!(worker.poll_once().await.unwrap());

    assert_eq!(invoker.invocation_count(), 0);
    let recent = queue.recent_completions(1).await.unwrap();
    assert_eq!(recent[0].status, CompletionStatus::Failed);
    assert_eq!(queue.stats(NODE).await.unwrap().processing, 0);
}

#[tokio::test]
async fn test_worker_discards_duplicate_of_running_task() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().with_id(3).with_name("dup").build();
    queue
        .enqueue(&TaskMessageBuilder::for_job(&job).build())
        .await
        .unwrap();

    let running = worker.executing().try_enter("3.dup").unwrap();
    assert!(worker.poll_once().await.unwrap());
    assert_eq!(invoker.invocation_count(), 0);
    assert_eq!(queue.stats(NODE).await.unwrap().processing, 0);

    // 本地触发的副本不会清理队列标记，丢弃时必须一并清掉
    drop(running);
    assert!(!queue.is_task_in_flight("3.dup").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_of_local_fire_clears_distributed_marker() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().with_id(4).with_name("handoff").build();
    queue
        .mark_distributed("4.handoff", NODE, Duration::from_secs(300))
        .await
        .unwrap();
    queue
        .enqueue(&TaskMessageBuilder::for_job(&job).build())
        .await
        .unwrap();

    let _running = worker.executing().try_enter("4.handoff").unwrap();
    assert!(worker.poll_once().await.unwrap());
    assert_eq!(invoker.invocation_count(), 0);
    assert!(!queue.is_task_in_flight("4.handoff").await.unwrap());
}

#[tokio::test]
async fn test_duplicate_of_running_delivery_keeps_markers() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);

    let job = JobMetadataBuilder::new().with_id(5).with_name("twice").build();
    queue
        .enqueue(&TaskMessageBuilder::for_job(&job).build())
        .await
        .unwrap();

    let _running = worker
        .executing()
        .try_enter_as("5.twice", ExecutionOrigin::Delivery)
        .unwrap();
    assert!(worker.poll_once().await.unwrap());
    assert_eq!(invoker.invocation_count(), 0);
    assert_eq!(queue.stats(NODE).await.unwrap().processing, 0);
    assert!(queue.is_task_in_flight("5.twice").await.unwrap());
}

#[tokio::test]
async fn test_worker_loops_consume_until_shutdown() {
    let (_store, queue) = setup(NODE);
    let invoker = ScriptedJobInvoker::new();
    let sink = RecordingLogSink::new();
    let worker = worker_for(&queue, &invoker, &sink);
    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = Arc::clone(&worker).start(&shutdown_tx);
    assert_eq!(handles.len(), 4);

    let job = JobMetadataBuilder::new().with_name("looped").build();
    let msg = TaskMessageBuilder::for_job(&job).delayed_by_ms(100).build();
    queue.enqueue(&msg).await.unwrap();

    let seen = {
        let invoker = invoker.clone();
        wait_until(Duration::from_secs(5), move || {
            let invoker = invoker.clone();
            async move { invoker.invocation_count() == 1 }
        })
        .await
    };
    assert!(seen);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
    assert_eq!(sink.labels(), vec!["succeeded"]);
}
