use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_cluster::{NodeIdentity, PoolSlot, PoolUsage, SchedulerManager, SchedulerManagerConfig};
use fleet_dispatcher::{MinMaxAvoidedStrategy, Placement, TaskDistributor, TaskDistributorConfig};
use fleet_domain::{keys, now_millis, CoordinationStore, ExecutionContext, IpPolicy, JobMetadata, Priority};
use fleet_errors::FleetResult;
use fleet_infrastructure::InMemoryCoordinationStore;
use fleet_queue::{DurableTaskQueue, DurableTaskQueueConfig};
use fleet_testing_utils::{seed_node, JobMetadataBuilder, StaticIpPolicy};
use mockall::mock;

const LOCAL: &str = "10.0.0.1:local";

mock! {
    Policy {}

    #[async_trait]
    impl IpPolicy for Policy {
        async fn is_blacklisted(&self, ip: &str) -> FleetResult<bool>;
    }
}

struct Node {
    store: Arc<InMemoryCoordinationStore>,
    usage: Arc<PoolUsage>,
    queue: Arc<DurableTaskQueue>,
    distributor: TaskDistributor,
}

fn node_on(
    store: &Arc<InMemoryCoordinationStore>,
    node_id: &str,
    ip_policy: Arc<dyn IpPolicy>,
) -> Node {
    let usage = PoolUsage::new(100);
    let manager = Arc::new(SchedulerManager::new(
        store.clone(),
        NodeIdentity::from_node_id(node_id).unwrap(),
        usage.clone(),
        SchedulerManagerConfig::default(),
    ));
    let queue = Arc::new(DurableTaskQueue::new(
        store.clone(),
        node_id,
        DurableTaskQueueConfig::default(),
    ));
    let distributor = TaskDistributor::new(
        manager,
        queue.clone(),
        ip_policy,
        Arc::new(MinMaxAvoidedStrategy::new()),
        TaskDistributorConfig::default(),
    );
    Node {
        store: store.clone(),
        usage,
        queue,
        distributor,
    }
}

fn local_node() -> Node {
    let store = Arc::new(InMemoryCoordinationStore::new());
    node_on(&store, LOCAL, Arc::new(StaticIpPolicy::default()))
}

fn load(usage: &Arc<PoolUsage>, active: usize) -> Vec<PoolSlot> {
    (0..active).map(|_| usage.acquire()).collect()
}

fn fire(job: &JobMetadata) -> ExecutionContext {
    ExecutionContext::new("trace-1", job.job_key(), LOCAL)
}

#[tokio::test]
async fn test_low_load_executes_locally_and_holds_lock() {
    let node = local_node();
    let job = JobMetadataBuilder::new().with_id(7).build();
    let task_id = job.job_key();

    let placement = node.distributor.decide(&task_id, &job, &fire(&job)).await;
    assert_eq!(placement, Placement::Local);
    assert!(node.distributor.holds_lock(&task_id));
    assert_eq!(
        node.store.get(&keys::lock(&task_id)).await.unwrap().as_deref(),
        Some(LOCAL)
    );

    node.distributor.release(&task_id).await;
    assert!(!node.distributor.holds_lock(&task_id));
    assert!(!node.store.exists(&keys::lock(&task_id)).await.unwrap());
}

#[tokio::test]
async fn test_in_flight_task_is_not_executed() {
    let node = local_node();
    let job = JobMetadataBuilder::new().build();
    node.queue
        .mark_distributed(&job.job_key(), "10.0.0.5:peer", Duration::from_secs(300))
        .await
        .unwrap();

    let placement = node.distributor.decide(&job.job_key(), &job, &fire(&job)).await;
    assert_eq!(placement, Placement::InFlight);
    assert!(!node.distributor.holds_lock(&job.job_key()));
}

#[tokio::test]
async fn test_blacklisted_local_ip_is_skipped() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let node = node_on(&store, LOCAL, Arc::new(StaticIpPolicy::new(["10.0.0.1"])));
    let job = JobMetadataBuilder::new().build();

    let placement = node.distributor.decide(&job.job_key(), &job, &fire(&job)).await;
    assert_eq!(placement, Placement::Blacklisted);
    assert!(!placement.executes_locally());
}

#[tokio::test]
async fn test_lock_held_by_other_node_is_contended() {
    let node = local_node();
    let job = JobMetadataBuilder::new().build();
    node.store
        .set(
            &keys::lock(&job.job_key()),
            "10.0.0.9:other",
            Some(Duration::from_secs(60)),
        )
        .await
        .unwrap();

    assert!(!node
        .distributor
        .should_execute_locally(&job.job_key(), &job, &fire(&job))
        .await);
}

#[tokio::test]
async fn test_two_nodes_race_for_same_fire() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let a = node_on(&store, "10.0.0.1:a", Arc::new(StaticIpPolicy::default()));
    let b = node_on(&store, "10.0.0.2:b", Arc::new(StaticIpPolicy::default()));
    let job = JobMetadataBuilder::new().build();
    let ctx = fire(&job);

    let key = job.job_key();
    let (pa, pb) = tokio::join!(
        a.distributor.decide(&key, &job, &ctx),
        b.distributor.decide(&key, &job, &ctx)
    );
    let winners = [&pa, &pb].iter().filter(|p| p.executes_locally()).count();
    assert_eq!(winners, 1);
    assert!([pa, pb].contains(&Placement::Contended));
}

#[tokio::test]
async fn test_overloaded_node_delegates_to_peer_near_average() {
    let node = local_node();
    let _slots = load(&node.usage, 92);
    let now = now_millis();
    seed_node(node.store.as_ref(), "10.0.0.2:busy", Some(now), Some(0.9)).await.unwrap();
    seed_node(node.store.as_ref(), "10.0.0.3:idle", Some(now), Some(0.3)).await.unwrap();
    seed_node(node.store.as_ref(), "10.0.0.4:mid", Some(now), Some(0.5)).await.unwrap();

    let job = JobMetadataBuilder::new()
        .with_id(11)
        .with_name("report")
        .with_priority(Priority::High)
        .build();
    let ctx = fire(&job);
    let placement = node.distributor.decide(&job.job_key(), &job, &ctx).await;
    assert_eq!(
        placement,
        Placement::Delegated {
            target_node: "10.0.0.4:mid".to_string()
        }
    );
    assert!(!node.distributor.holds_lock(&job.job_key()));

    let stats = node.queue.stats("10.0.0.4:mid").await.unwrap();
    assert_eq!(stats.high, 1);
    assert_eq!(
        node.store
            .get(&keys::distributed_marker(&job.job_key()))
            .await
            .unwrap()
            .as_deref(),
        Some("10.0.0.4:mid")
    );

    // 同一次触发的重复调用识别到在途交接
    let again = node.distributor.decide(&job.job_key(), &job, &ctx).await;
    assert_eq!(again, Placement::InFlight);

    // 对端确认后标记清除
    let peer_queue = DurableTaskQueue::new(
        node.store.clone(),
        "10.0.0.4:mid",
        DurableTaskQueueConfig::default(),
    );
    let delivery = peer_queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
    assert_eq!(delivery.message.trace_id, ctx.trace_id);
    assert_eq!(JobMetadata::from_payload(&delivery.message.job_payload).unwrap(), job);
    peer_queue.ack(&delivery).await.unwrap();
    assert!(!node.queue.is_task_in_flight(&job.job_key()).await.unwrap());
}

#[tokio::test]
async fn test_overloaded_without_peers_falls_back_to_local() {
    let node = local_node();
    let _slots = load(&node.usage, 95);
    seed_node(node.store.as_ref(), "10.0.0.2:stale", Some(0), Some(0.1)).await.unwrap();
    seed_node(node.store.as_ref(), "10.0.0.3:full", Some(now_millis()), Some(0.99)).await.unwrap();

    let job = JobMetadataBuilder::new().build();
    let placement = node.distributor.decide(&job.job_key(), &job, &fire(&job)).await;
    assert_eq!(placement, Placement::Local);
    assert!(node.distributor.holds_lock(&job.job_key()));
}

#[tokio::test]
async fn test_blacklisted_peer_is_not_a_target() {
    let store = Arc::new(InMemoryCoordinationStore::new());
    let mut policy = MockPolicy::new();
    policy
        .expect_is_blacklisted()
        .returning(|ip| Ok(ip == "10.0.0.4"));
    let node = node_on(&store, LOCAL, Arc::new(policy));
    let _slots = load(&node.usage, 90);
    let now = now_millis();
    seed_node(store.as_ref(), "10.0.0.2:busy", Some(now), Some(0.7)).await.unwrap();
    seed_node(store.as_ref(), "10.0.0.3:idle", Some(now), Some(0.2)).await.unwrap();
    seed_node(store.as_ref(), "10.0.0.4:mid", Some(now), Some(0.3)).await.unwrap();

    let job = JobMetadataBuilder::new().build();
    let placement = node.distributor.decide(&job.job_key(), &job, &fire(&job)).await;
    assert_eq!(
        placement,
        Placement::Delegated {
            target_node: "10.0.0.3:idle".to_string()
        }
    );
}

#[tokio::test]
async fn test_store_outage_defaults_to_local() {
    let node = local_node();
    node.store.set_offline(true);
    let job = JobMetadataBuilder::new().build();

    let placement = node.distributor.decide(&job.job_key(), &job, &fire(&job)).await;
    assert_eq!(placement, Placement::Local);
    node.distributor.release(&job.job_key()).await;
}
