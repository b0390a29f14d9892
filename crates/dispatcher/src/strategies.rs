use fleet_domain::NodeRecord;
use tracing::debug;

/// 负载相差小于该值视为相等
const LOAD_EPSILON: f64 = 1e-9;

pub trait PlacementStrategy: Send + Sync {
    /// 从存活对端中选出目标节点，没有合适节点时返回 `None`
    fn select_peer<'a>(&self, peers: &'a [NodeRecord], load_threshold: f64) -> Option<&'a NodeRecord>;

    fn name(&self) -> &str;
}

/// 去掉负载最高的一个对端，再选负载最接近剩余平均值的节点
///
/// 不直接取最小值：多个节点都接近空闲时，避免所有流量都压到同一个节点上。
#[derive(Debug, Default)]
pub struct MinMaxAvoidedStrategy;

impl MinMaxAvoidedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl PlacementStrategy for MinMaxAvoidedStrategy {
    fn select_peer<'a>(&self, peers: &'a [NodeRecord], load_threshold: f64) -> Option<&'a NodeRecord> {
        if peers.is_empty() {
            debug!("没有可用的对端节点");
            return None;
        }

        let mut candidates: Vec<&NodeRecord> = peers.iter().collect();
        // 只剩一个对端时不再剔除
        if candidates.len() >= 2 {
            let max_index = candidates
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| {
                    a.load_metric
                        .value()
                        .partial_cmp(&b.load_metric.value())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(index, _)| index)?;
            let removed = candidates.remove(max_index);
            debug!(
                "剔除负载最高的节点: {} (负载: {})",
                removed.node_id, removed.load_metric
            );
        }

        let average = candidates
            .iter()
            .map(|peer| peer.load_metric.value())
            .sum::<f64>()
            / candidates.len() as f64;

        let mut selected = candidates[0];
        for peer in candidates.iter().skip(1) {
            let distance = (peer.load_metric.value() - average).abs();
            let best = (selected.load_metric.value() - average).abs();
            let closer = distance + LOAD_EPSILON < best;
            let tied_but_busier = (distance - best).abs() <= LOAD_EPSILON
                && peer.load_metric.value() > selected.load_metric.value();
            if closer || tied_but_busier {
                selected = peer;
            }
        }

        if selected.load_metric.value() >= load_threshold {
            debug!(
                "候选节点 {} 负载 {} 不低于阈值 {}，放弃分发",
                selected.node_id, selected.load_metric, load_threshold
            );
            return None;
        }

        debug!(
            "最小最大规避策略选择节点: {} (负载: {}, 平均: {:.3})",
            selected.node_id, selected.load_metric, average
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "MinMaxAvoided"
    }
}
