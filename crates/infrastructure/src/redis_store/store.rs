use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::CoordinationStore;
use fleet_errors::{FleetError, FleetResult};
use redis::Script;

use super::connection_manager::RedisConnectionManager;

/// 仅当值仍属于调用方时删除
const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// 给阻塞命令的网络往返预留的余量
const BLOCKING_GRACE: Duration = Duration::from_secs(1);

/// 基于Redis的协调存储
pub struct RedisCoordinationStore {
    connections: Arc<RedisConnectionManager>,
    delete_if_equals: Script,
}

impl RedisCoordinationStore {
    pub fn new(connections: Arc<RedisConnectionManager>) -> Self {
        Self {
            connections,
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
        }
    }

    fn millis(ttl: Duration) -> u64 {
        (ttl.as_millis() as u64).max(1)
    }

    async fn blocking_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> FleetResult<Option<String>> {
        let mut conn = self.connections.blocking_connection().lock().await;
        let mut cmd = redis::cmd("BLMOVE");
        cmd.arg(source)
            .arg(destination)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs_f64());

        match tokio::time::timeout(timeout + BLOCKING_GRACE, cmd.query_async(&mut *conn)).await {
            Ok(result) => {
                let moved: Option<String> = result?;
                Ok(moved)
            }
            Err(_) => Err(FleetError::store_unavailable(format!(
                "BLMOVE {source} 超过 {}ms 未返回",
                (timeout + BLOCKING_GRACE).as_millis()
            ))),
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        let mut conn = self.connections.connection();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()> {
        let mut conn = self.connections.connection();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(Self::millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(Self::millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(Self::millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn delete(&self, key: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let removed: i64 = self
            .delete_if_equals
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let added: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let removed: i64 = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> FleetResult<Vec<String>> {
        let mut conn = self.connections.connection();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    async fn set_contains(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let found: i64 = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(found == 1)
    }

    async fn list_push_front(&self, key: &str, value: &str) -> FleetResult<u64> {
        let mut conn = self.connections.connection();
        let len: u64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(len)
    }

    async fn list_pop_back(&self, key: &str) -> FleetResult<Option<String>> {
        let mut conn = self.connections.connection();
        let value: Option<String> = redis::cmd("RPOP").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> FleetResult<Option<String>> {
        if let Some(timeout) = timeout {
            return self.blocking_move(source, destination, timeout).await;
        }
        let mut conn = self.connections.connection();
        let moved: Option<String> = redis::cmd("LMOVE")
            .arg(source)
            .arg(destination)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;
        Ok(moved)
    }

    async fn list_remove(&self, key: &str, value: &str) -> FleetResult<u64> {
        let mut conn = self.connections.connection();
        let removed: u64 = redis::cmd("LREM")
            .arg(key)
            .arg(1)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FleetResult<Vec<String>> {
        let mut conn = self.connections.connection();
        let values: Vec<String> = redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn list_len(&self, key: &str) -> FleetResult<u64> {
        let mut conn = self.connections.connection();
        let len: u64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> FleetResult<()> {
        let mut conn = self.connections.connection();
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> FleetResult<()> {
        let mut conn = self.connections.connection();
        let _: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> FleetResult<Vec<String>> {
        let mut conn = self.connections.connection();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(members)
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut conn = self.connections.connection();
        let removed: i64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn sorted_len(&self, key: &str) -> FleetResult<u64> {
        let mut conn = self.connections.connection();
        let len: u64 = redis::cmd("ZCARD").arg(key).query_async(&mut conn).await?;
        Ok(len)
    }
}
