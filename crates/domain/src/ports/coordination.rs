use std::time::Duration;

use async_trait::async_trait;
use fleet_errors::FleetResult;

/// 共享协调存储抽象
///
/// 只要求带TTL的字符串、集合、列表（队列）和按分数排序的集合（延迟结构）。
/// 参考部署使用Redis，单机或测试场景可使用内存实现。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> FleetResult<Option<String>>;

    /// 写入字符串，`ttl` 为空表示不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()>;

    /// 仅当键不存在时写入（SET NX PX），返回是否写入成功
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<bool>;

    /// 重置过期时间，键不存在时返回 false
    async fn expire(&self, key: &str, ttl: Duration) -> FleetResult<bool>;

    async fn delete(&self, key: &str) -> FleetResult<bool>;

    /// 仅当当前值等于 `expected` 时删除（原子比较删除）
    async fn delete_if_equals(&self, key: &str, expected: &str) -> FleetResult<bool>;

    async fn exists(&self, key: &str) -> FleetResult<bool>;

    async fn set_add(&self, key: &str, member: &str) -> FleetResult<bool>;

    async fn set_remove(&self, key: &str, member: &str) -> FleetResult<bool>;

    async fn set_members(&self, key: &str) -> FleetResult<Vec<String>>;

    async fn set_contains(&self, key: &str, member: &str) -> FleetResult<bool>;

    /// 头部插入（LPUSH），返回列表长度
    async fn list_push_front(&self, key: &str, value: &str) -> FleetResult<u64>;

    /// 尾部弹出（RPOP）
    async fn list_pop_back(&self, key: &str) -> FleetResult<Option<String>>;

    /// 从 `source` 尾部弹出并原子地插入 `destination` 头部。
    ///
    /// `timeout` 为空时立即返回；否则最多阻塞 `timeout`（BLMOVE）。
    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> FleetResult<Option<String>>;

    /// 删除第一个等于 `value` 的元素，返回删除个数
    async fn list_remove(&self, key: &str, value: &str) -> FleetResult<u64>;

    /// 与 LRANGE 语义一致，支持负数下标
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FleetResult<Vec<String>>;

    async fn list_len(&self, key: &str) -> FleetResult<u64>;

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> FleetResult<()>;

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> FleetResult<()>;

    /// 取出分数不大于 `max_score` 的成员，按分数升序，最多 `limit` 个
    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> FleetResult<Vec<String>>;

    /// 删除成员，返回是否确实删除（并发消费者据此判定归属）
    async fn sorted_remove(&self, key: &str, member: &str) -> FleetResult<bool>;

    async fn sorted_len(&self, key: &str) -> FleetResult<u64>;
}
