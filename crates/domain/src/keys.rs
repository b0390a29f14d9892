//! 协调存储键空间
//!
//! 所有节点必须对这些键名达成一致，修改任何一个都会导致新旧节点互相不可见。

use crate::value_objects::Priority;

/// 集群成员集合
pub const SCHEDULER_NODES: &str = "SCHEDULER_NODES";
/// 已驱逐但队列尚未回收完成的节点
pub const PENDING_DRAIN_NODES: &str = "SCHEDULER_NODES:PENDING_DRAIN";
/// 主节点租约
pub const SCHEDULER_MASTER: &str = "SCHEDULER_MASTER";
/// 选举互斥使用的资源名，实际键为 `SCHEDULER_LOCK:MASTER_ELECTION`
pub const MASTER_ELECTION_RESOURCE: &str = "MASTER_ELECTION";
/// IP黑名单集合
pub const IP_BLACKLIST: &str = "quartz:ip:blacklist";
/// 最近完成任务记录
pub const RECENT_COMPLETIONS: &str = "task:monitor:recent";

pub fn node_heartbeat(node_id: &str) -> String {
    format!("SCHEDULER_NODE:{node_id}:HEARTBEAT")
}

pub fn node_usage(node_id: &str) -> String {
    format!("SCHEDULER_NODE:{node_id}:USAGE")
}

pub fn job_master_node(job_id: i64) -> String {
    format!("JOB_MASTER_NODE:{job_id}")
}

pub fn lock(resource: &str) -> String {
    format!("SCHEDULER_LOCK:{resource}")
}

pub fn ready_queue(node_id: &str, priority: Priority) -> String {
    format!("mq:task:{node_id}:{}", priority.as_str())
}

pub fn processing_queue(node_id: &str) -> String {
    format!("mq:task:{node_id}:processing")
}

pub fn delay_queue(node_id: &str) -> String {
    format!("mq:delay:{node_id}")
}

/// 失联节点任务的全局再分配队列
pub fn global_ready_queue(priority: Priority) -> String {
    format!("mq:task:global:{}", priority.as_str())
}

pub fn distributed_marker(task_id: &str) -> String {
    format!("mq:task:distributed:{task_id}")
}

pub fn inflight_marker(task_id: &str) -> String {
    format!("mq:task:inflight:{task_id}")
}
