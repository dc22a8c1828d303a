use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
    /// 完成当前任务后从注册表移除
    Draining,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Draining => "draining",
        };
        f.write_str(s)
    }
}

/// Worker滚动性能统计
///
/// 延迟与成功率都基于最近 `window` 次执行结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    window: usize,
    recent_latencies_ms: VecDeque<f64>,
    recent_outcomes: VecDeque<bool>,
    pub completed_count: u64,
    pub failed_count: u64,
}

impl WorkerStats {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            recent_latencies_ms: VecDeque::with_capacity(window),
            recent_outcomes: VecDeque::with_capacity(window),
            completed_count: 0,
            failed_count: 0,
        }
    }

    pub fn record(&mut self, success: bool, latency: Duration) {
        if self.recent_latencies_ms.len() == self.window {
            self.recent_latencies_ms.pop_front();
        }
        if self.recent_outcomes.len() == self.window {
            self.recent_outcomes.pop_front();
        }
        self.recent_latencies_ms
            .push_back(latency.as_secs_f64() * 1000.0);
        self.recent_outcomes.push_back(success);

        if success {
            self.completed_count += 1;
        } else {
            self.failed_count += 1;
        }
    }

    /// 滚动平均延迟（毫秒），无样本时为0
    pub fn avg_latency_ms(&self) -> f64 {
        if self.recent_latencies_ms.is_empty() {
            return 0.0;
        }
        self.recent_latencies_ms.iter().sum::<f64>() / self.recent_latencies_ms.len() as f64
    }

    /// 滚动成功率，无样本时为1.0
    pub fn success_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 1.0;
        }
        let successes = self.recent_outcomes.iter().filter(|ok| **ok).count();
        successes as f64 / self.recent_outcomes.len() as f64
    }

    pub fn sample_count(&self) -> usize {
        self.recent_outcomes.len()
    }
}

/// 执行槽位
///
/// 一个Worker最多同时执行 `capacity` 个任务。
/// 不变式：`current_task_ids` 非空当且仅当状态为 `Busy`，或状态为 `Draining`
/// 且仍在完成剩余的任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub id: String,
    /// 注册顺序
    pub seq: u64,
    pub status: WorkerStatus,
    /// 按分派顺序排列
    pub current_task_ids: Vec<String>,
    pub capacity: u32,
    pub stats: WorkerStats,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl WorkerHandle {
    pub fn new(seq: u64, capacity: u32, stats_window: usize) -> Self {
        let now = Utc::now();
        Self {
            id: format!("worker-{seq:03}"),
            seq,
            status: WorkerStatus::Idle,
            current_task_ids: Vec::new(),
            capacity: capacity.max(1),
            stats: WorkerStats::new(stats_window),
            created_at: now,
            last_heartbeat: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    pub fn is_busy(&self) -> bool {
        self.status == WorkerStatus::Busy
    }

    pub fn is_draining(&self) -> bool {
        self.status == WorkerStatus::Draining
    }

    /// 是否仍有任务在执行
    pub fn has_task(&self) -> bool {
        !self.current_task_ids.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.current_task_ids.len()
    }

    /// 空闲或忙碌但未满的Worker可以接收新任务
    pub fn has_free_slot(&self) -> bool {
        (self.is_idle() || self.is_busy()) && self.in_flight() < self.capacity as usize
    }

    pub fn assign(&mut self, task_id: &str) {
        self.status = WorkerStatus::Busy;
        self.current_task_ids.push(task_id.to_string());
        self.last_heartbeat = Utc::now();
    }

    /// 释放一个任务，返回Worker是否应从注册表移除
    ///
    /// 还有其他任务在执行时状态不变；最后一个任务结束后，
    /// 排空中的Worker下线，其余回到空闲。
    pub fn release(&mut self, task_id: &str) -> bool {
        self.current_task_ids.retain(|id| id != task_id);
        if self.has_task() {
            return false;
        }
        match self.status {
            WorkerStatus::Draining | WorkerStatus::Offline => {
                self.status = WorkerStatus::Offline;
                true
            }
            _ => {
                self.status = WorkerStatus::Idle;
                false
            }
        }
    }

    pub fn mark_draining(&mut self) {
        self.status = WorkerStatus::Draining;
    }

    pub fn mark_offline(&mut self) {
        self.status = WorkerStatus::Offline;
    }

    pub fn touch_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = at;
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        let elapsed = now - self.last_heartbeat;
        elapsed.to_std().map(|e| e > timeout).unwrap_or(false)
    }
}

/// Worker池状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolStatus {
    pub workers: Vec<WorkerHandle>,
    pub total: usize,
    pub idle: usize,
    pub busy: usize,
    pub draining: usize,
}

impl WorkerPoolStatus {
    pub fn from_workers(workers: Vec<WorkerHandle>) -> Self {
        let idle = workers.iter().filter(|w| w.is_idle()).count();
        let busy = workers.iter().filter(|w| w.is_busy()).count();
        let draining = workers.iter().filter(|w| w.is_draining()).count();
        Self {
            total: workers.len(),
            idle,
            busy,
            draining,
            workers,
        }
    }
}

/// 扩缩容结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleResult {
    pub previous_count: usize,
    pub new_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_stats_rolling_window() {
        let mut stats = WorkerStats::new(3);
        assert_eq!(stats.avg_latency_ms(), 0.0);
        assert_eq!(stats.success_rate(), 1.0);

        stats.record(true, Duration::from_millis(10));
        stats.record(false, Duration::from_millis(20));
        stats.record(true, Duration::from_millis(30));
        assert!((stats.avg_latency_ms() - 20.0).abs() < 1e-9);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);

        // 第一个样本被挤出窗口
        stats.record(true, Duration::from_millis(60));
        assert!((stats.avg_latency_ms() - 110.0 / 3.0).abs() < 1e-9);
        assert!((stats.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.completed_count, 3);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.sample_count(), 3);
    }

    #[test]
    fn test_worker_assign_and_release() {
        let mut worker = WorkerHandle::new(1, 1, 10);
        assert_eq!(worker.id, "worker-001");
        assert!(worker.is_idle());

        worker.assign("task-a");
        assert!(worker.is_busy());
        assert!(!worker.has_free_slot());
        assert_eq!(worker.current_task_ids, vec!["task-a"]);

        assert!(!worker.release("task-a"));
        assert!(worker.is_idle());
        assert!(worker.has_free_slot());
        assert!(worker.current_task_ids.is_empty());
    }

    #[test]
    fn test_worker_runs_up_to_capacity() {
        let mut worker = WorkerHandle::new(4, 2, 10);
        worker.assign("task-a");
        assert!(worker.is_busy());
        assert!(worker.has_free_slot());

        worker.assign("task-b");
        assert_eq!(worker.in_flight(), 2);
        assert!(!worker.has_free_slot());

        // 释放其中一个后仍然忙碌，但可以再接收任务
        assert!(!worker.release("task-a"));
        assert!(worker.is_busy());
        assert!(worker.has_free_slot());
        assert_eq!(worker.current_task_ids, vec!["task-b"]);

        assert!(!worker.release("task-b"));
        assert!(worker.is_idle());
    }

    #[test]
    fn test_draining_worker_is_removed_on_release() {
        let mut worker = WorkerHandle::new(2, 1, 10);
        worker.assign("task-b");
        worker.mark_draining();
        assert!(worker.has_task());
        assert!(!worker.has_free_slot());

        assert!(worker.release("task-b"));
        assert_eq!(worker.status, WorkerStatus::Offline);
    }

    #[test]
    fn test_draining_worker_waits_for_every_task() {
        let mut worker = WorkerHandle::new(5, 2, 10);
        worker.assign("task-c");
        worker.assign("task-d");
        worker.mark_draining();

        assert!(!worker.release("task-c"));
        assert!(worker.is_draining());
        assert!(worker.release("task-d"));
        assert_eq!(worker.status, WorkerStatus::Offline);
    }

    #[test]
    fn test_heartbeat_expiry() {
        let mut worker = WorkerHandle::new(3, 1, 10);
        let now = Utc::now();
        worker.touch_heartbeat(now - chrono::Duration::seconds(30));
        assert!(worker.is_heartbeat_expired(Duration::from_secs(10), now));
        assert!(!worker.is_heartbeat_expired(Duration::from_secs(60), now));
    }

    #[test]
    fn test_pool_status_counts() {
        let mut busy = WorkerHandle::new(1, 1, 10);
        busy.assign("t");
        let idle = WorkerHandle::new(2, 1, 10);
        let mut draining = WorkerHandle::new(3, 1, 10);
        draining.assign("u");
        draining.mark_draining();

        let status = WorkerPoolStatus::from_workers(vec![busy, idle, draining]);
        assert_eq!(status.total, 3);
        assert_eq!(status.idle, 1);
        assert_eq!(status.busy, 1);
        assert_eq!(status.draining, 1);
    }
}
