use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fleet_domain::LoadMetric;

/// 本地执行槽位占用情况，负载 = 活跃数 / 槽位数
#[derive(Debug)]
pub struct PoolUsage {
    active: AtomicUsize,
    size: usize,
}

impl PoolUsage {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            size,
        })
    }

    /// 占用一个槽位，返回值释放时归还
    pub fn acquire(self: &Arc<Self>) -> PoolSlot {
        self.active.fetch_add(1, Ordering::SeqCst);
        PoolSlot {
            usage: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn load_metric(&self) -> LoadMetric {
        LoadMetric::from_ratio(self.active(), self.size)
    }
}

#[derive(Debug)]
pub struct PoolSlot {
    usage: Arc<PoolUsage>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.usage.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_track_load() {
        let usage = PoolUsage::new(4);
        assert_eq!(usage.load_metric().value(), 0.0);

        let first = usage.acquire();
        let second = usage.acquire();
        assert_eq!(usage.load_metric().value(), 0.5);

        drop(first);
        assert_eq!(usage.active(), 1);
        drop(second);
        assert_eq!(usage.load_metric().value(), 0.0);
    }

    #[test]
    fn test_oversubscription_clamps_to_full() {
        let usage = PoolUsage::new(1);
        let _a = usage.acquire();
        let _b = usage.acquire();
        assert_eq!(usage.load_metric().value(), 1.0);
    }
}
