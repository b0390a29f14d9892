use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::CoordinationStore;
use fleet_errors::{FleetError, FleetResult};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::info;

/// 内存协调存储
///
/// 与Redis实现语义一致的单进程版本，用于嵌入式部署和测试。过期时间基于
/// `tokio::time::Instant`，因此在 `start_paused` 的测试中可以精确推进时间。
#[derive(Debug, Default)]
pub struct InMemoryCoordinationStore {
    state: Mutex<State>,
    /// 列表写入时唤醒阻塞中的 `list_move`
    list_pushed: Notify,
    offline: AtomicBool,
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    expires_at: HashMap<String, Instant>,
}

#[derive(Debug)]
enum Entry {
    Text(String),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
    Sorted(HashMap<String, i64>),
}

impl State {
    fn purge_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expires_at.get(key) {
            if *deadline <= Instant::now() {
                self.expires_at.remove(key);
                self.entries.remove(key);
            }
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.entries.get_mut(key)
    }

    fn remove(&mut self, key: &str) -> Option<Entry> {
        self.expires_at.remove(key);
        self.entries.remove(key)
    }

    /// 空的集合类结构与Redis一样视为键不存在
    fn drop_if_empty(&mut self, key: &str) {
        let empty = match self.entries.get(key) {
            Some(Entry::Set(set)) => set.is_empty(),
            Some(Entry::List(list)) => list.is_empty(),
            Some(Entry::Sorted(sorted)) => sorted.is_empty(),
            _ => false,
        };
        if empty {
            self.remove(key);
        }
    }

    fn set_mut(&mut self, key: &str) -> FleetResult<&mut BTreeSet<String>> {
        self.purge_expired(key);
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(BTreeSet::new()))
        {
            Entry::Set(set) => Ok(set),
            _ => Err(wrong_type(key)),
        }
    }

    fn list_mut(&mut self, key: &str) -> FleetResult<&mut VecDeque<String>> {
        self.purge_expired(key);
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()))
        {
            Entry::List(list) => Ok(list),
            _ => Err(wrong_type(key)),
        }
    }

    fn sorted_mut(&mut self, key: &str) -> FleetResult<&mut HashMap<String, i64>> {
        self.purge_expired(key);
        match self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Sorted(HashMap::new()))
        {
            Entry::Sorted(sorted) => Ok(sorted),
            _ => Err(wrong_type(key)),
        }
    }

    fn list_ref(&mut self, key: &str) -> FleetResult<Option<&VecDeque<String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry::List(list)) => Ok(Some(list)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn pop_back(&mut self, key: &str) -> FleetResult<Option<String>> {
        let value = match self.entry(key) {
            None => return Ok(None),
            Some(Entry::List(list)) => list.pop_back(),
            Some(_) => return Err(wrong_type(key)),
        };
        self.drop_if_empty(key);
        Ok(value)
    }
}

fn wrong_type(key: &str) -> FleetError {
    FleetError::Store(format!("WRONGTYPE 键 {key} 的类型不匹配"))
}

/// LRANGE/LTRIM 的下标换算，返回闭区间
fn resolve_range(start: isize, stop: isize, len: usize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        info!("使用内存协调存储，仅适用于单进程部署");
        Self::default()
    }

    /// 模拟存储不可达，之后的所有调用都返回 `StoreUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn state(&self) -> FleetResult<MutexGuard<'_, State>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(FleetError::store_unavailable("内存存储已被标记为离线"));
        }
        self.state
            .lock()
            .map_err(|_| FleetError::Internal("内存存储锁已中毒".to_string()))
    }

    /// 键的剩余存活时间，测试断言TTL用
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().ok()?;
        state.purge_expired(key);
        state
            .expires_at
            .get(key)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn try_move(&self, source: &str, destination: &str) -> FleetResult<Option<String>> {
        let mut state = self.state()?;
        if let Some(entry) = state.entry(destination) {
            if !matches!(entry, Entry::List(_)) {
                return Err(wrong_type(destination));
            }
        }
        let Some(value) = state.pop_back(source)? else {
            return Ok(None);
        };
        state.list_mut(destination)?.push_front(value.clone());
        Ok(Some(value))
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn get(&self, key: &str) -> FleetResult<Option<String>> {
        let mut state = self.state()?;
        match state.entry(key) {
            None => Ok(None),
            Some(Entry::Text(value)) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> FleetResult<()> {
        let mut state = self.state()?;
        state.remove(key);
        state.entries.insert(key.to_string(), Entry::Text(value.to_string()));
        if let Some(ttl) = ttl {
            state.expires_at.insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> FleetResult<bool> {
        let mut state = self.state()?;
        if state.entry(key).is_some() {
            return Ok(false);
        }
        state.entries.insert(key.to_string(), Entry::Text(value.to_string()));
        state.expires_at.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> FleetResult<bool> {
        let mut state = self.state()?;
        if state.entry(key).is_none() {
            return Ok(false);
        }
        state.expires_at.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        state.purge_expired(key);
        Ok(state.remove(key).is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        let matches = matches!(state.entry(key), Some(Entry::Text(value)) if value == expected);
        if matches {
            state.remove(key);
        }
        Ok(matches)
    }

    async fn exists(&self, key: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        Ok(state.entry(key).is_some())
    }

    async fn set_add(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        Ok(state.set_mut(key)?.insert(member.to_string()))
    }

    async fn set_remove(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        let removed = match state.entry(key) {
            None => false,
            Some(Entry::Set(set)) => set.remove(member),
            Some(_) => return Err(wrong_type(key)),
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> FleetResult<Vec<String>> {
        let mut state = self.state()?;
        match state.entry(key) {
            None => Ok(Vec::new()),
            Some(Entry::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        match state.entry(key) {
            None => Ok(false),
            Some(Entry::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_push_front(&self, key: &str, value: &str) -> FleetResult<u64> {
        let len = {
            let mut state = self.state()?;
            let list = state.list_mut(key)?;
            list.push_front(value.to_string());
            list.len() as u64
        };
        self.list_pushed.notify_waiters();
        Ok(len)
    }

    async fn list_pop_back(&self, key: &str) -> FleetResult<Option<String>> {
        let mut state = self.state()?;
        state.pop_back(key)
    }

    async fn list_move(
        &self,
        source: &str,
        destination: &str,
        timeout: Option<Duration>,
    ) -> FleetResult<Option<String>> {
        let Some(timeout) = timeout else {
            return self.try_move(source, destination);
        };

        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.list_pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_move(source, destination)? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn list_remove(&self, key: &str, value: &str) -> FleetResult<u64> {
        let mut state = self.state()?;
        let removed = match state.entry(key) {
            None => 0,
            Some(Entry::List(list)) => match list.iter().position(|item| item == value) {
                Some(index) => {
                    list.remove(index);
                    1
                }
                None => 0,
            },
            Some(_) => return Err(wrong_type(key)),
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FleetResult<Vec<String>> {
        let mut state = self.state()?;
        let Some(list) = state.list_ref(key)? else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_len(&self, key: &str) -> FleetResult<u64> {
        let mut state = self.state()?;
        Ok(state.list_ref(key)?.map_or(0, |list| list.len() as u64))
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> FleetResult<()> {
        let mut state = self.state()?;
        match state.entry(key) {
            None => return Ok(()),
            Some(Entry::List(list)) => match resolve_range(start, stop, list.len()) {
                Some((from, to)) => {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
                None => list.clear(),
            },
            Some(_) => return Err(wrong_type(key)),
        }
        state.drop_if_empty(key);
        Ok(())
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> FleetResult<()> {
        let mut state = self.state()?;
        state.sorted_mut(key)?.insert(member.to_string(), score);
        Ok(())
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> FleetResult<Vec<String>> {
        let mut state = self.state()?;
        let sorted = match state.entry(key) {
            None => return Ok(Vec::new()),
            Some(Entry::Sorted(sorted)) => sorted,
            Some(_) => return Err(wrong_type(key)),
        };
        let mut due: Vec<(&i64, &String)> = sorted
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (score, member))
            .collect();
        due.sort();
        Ok(due
            .into_iter()
            .take(limit)
            .map(|(_, member)| member.clone())
            .collect())
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> FleetResult<bool> {
        let mut state = self.state()?;
        let removed = match state.entry(key) {
            None => false,
            Some(Entry::Sorted(sorted)) => sorted.remove(member).is_some(),
            Some(_) => return Err(wrong_type(key)),
        };
        state.drop_if_empty(key);
        Ok(removed)
    }

    async fn sorted_len(&self, key: &str) -> FleetResult<u64> {
        let mut state = self.state()?;
        match state.entry(key) {
            None => Ok(0),
            Some(Entry::Sorted(sorted)) => Ok(sorted.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
