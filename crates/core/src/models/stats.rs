use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskPriority;

/// 按优先级统计的排队任务数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityDistribution {
    pub critical: usize,
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl PriorityDistribution {
    pub fn increment(&mut self, priority: TaskPriority) {
        *self.slot_mut(priority) += 1;
    }

    pub fn decrement(&mut self, priority: TaskPriority) {
        let slot = self.slot_mut(priority);
        *slot = slot.saturating_sub(1);
    }

    pub fn get(&self, priority: TaskPriority) -> usize {
        match priority {
            TaskPriority::Critical => self.critical,
            TaskPriority::High => self.high,
            TaskPriority::Normal => self.normal,
            TaskPriority::Low => self.low,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.normal + self.low
    }

    pub fn as_map(&self) -> BTreeMap<String, usize> {
        TaskPriority::ALL
            .iter()
            .map(|p| (p.as_str().to_string(), self.get(*p)))
            .collect()
    }

    fn slot_mut(&mut self, priority: TaskPriority) -> &mut usize {
        match priority {
            TaskPriority::Critical => &mut self.critical,
            TaskPriority::High => &mut self.high,
            TaskPriority::Normal => &mut self.normal,
            TaskPriority::Low => &mut self.low,
        }
    }
}

/// 队列快照
///
/// `queue_efficiency` 为在目标等待时间内出队的任务占全部出队任务的比例，
/// 尚无出队记录时约定为 1.0。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub length: usize,
    pub priority_distribution: PriorityDistribution,
    pub oldest_task_age: Option<Duration>,
    pub queue_efficiency: f64,
}

/// 引擎处理统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub active_workers: usize,
    /// 指数移动平均处理时间
    pub avg_processing_time: Duration,
    pub throughput_per_minute: f64,
    /// completed / total，无提交时为 0
    pub completion_rate: f64,
    pub strategy_switches: u64,
}

/// 当前负载均衡策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyInfo {
    /// 配置的策略名
    pub name: String,
    /// 实际生效的子策略，仅自适应策略与 `name` 不同
    pub effective: String,
}

/// 自适应策略的一次切换
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySwitch {
    pub from: String,
    pub to: String,
    pub worker_id: Option<String>,
    pub success_rate: Option<f64>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_distribution() {
        let mut dist = PriorityDistribution::default();
        dist.increment(TaskPriority::Critical);
        dist.increment(TaskPriority::Low);
        dist.increment(TaskPriority::Low);
        dist.decrement(TaskPriority::Low);
        dist.decrement(TaskPriority::High);

        assert_eq!(dist.total(), 2);
        assert_eq!(dist.get(TaskPriority::Critical), 1);
        assert_eq!(dist.get(TaskPriority::High), 0);

        let map = dist.as_map();
        assert_eq!(map.get("low"), Some(&1));
        assert_eq!(map.len(), 4);
    }
}
