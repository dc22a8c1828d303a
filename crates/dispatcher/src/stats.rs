//! Processing statistics for the engine
//!
//! All counters are fed from the same events the scheduler loop handles and are
//! mirrored into the `metrics` facade so an installed exporter can scrape them.

use std::collections::VecDeque;
use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tokio::time::Instant;

use engine_core::config::StatsConfig;
use engine_core::models::ProcessingStats;

pub struct StatsCollector {
    config: StatsConfig,
    target_wait: Duration,

    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retried: u64,
    strategy_switches: u64,

    dequeued: u64,
    dequeued_within_target: u64,
    /// 吞吐量滑动窗口内的完成时刻
    completions: VecDeque<Instant>,
    avg_processing_ms: Option<f64>,

    submitted_total: Counter,
    completed_total: Counter,
    failed_total: Counter,
    cancelled_total: Counter,
    retries_total: Counter,
    strategy_switches_total: Counter,
    processing_duration: Histogram,
    queue_wait_duration: Histogram,
    queue_depth: Gauge,
    active_workers: Gauge,
}

impl StatsCollector {
    pub fn new(config: StatsConfig, target_wait: Duration) -> Self {
        Self {
            config,
            target_wait,
            submitted: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
            retried: 0,
            strategy_switches: 0,
            dequeued: 0,
            dequeued_within_target: 0,
            completions: VecDeque::new(),
            avg_processing_ms: None,
            submitted_total: counter!("engine_tasks_submitted_total"),
            completed_total: counter!("engine_tasks_completed_total"),
            failed_total: counter!("engine_tasks_failed_total"),
            cancelled_total: counter!("engine_tasks_cancelled_total"),
            retries_total: counter!("engine_task_retries_total"),
            strategy_switches_total: counter!("engine_strategy_switches_total"),
            processing_duration: histogram!("engine_task_processing_duration_seconds"),
            queue_wait_duration: histogram!("engine_queue_wait_duration_seconds"),
            queue_depth: gauge!("engine_queue_depth"),
            active_workers: gauge!("engine_active_workers"),
        }
    }

    pub fn record_submitted(&mut self, count: usize) {
        self.submitted += count as u64;
        self.submitted_total.increment(count as u64);
    }

    /// Record a task leaving the queue after waiting `wait`
    pub fn record_dequeued(&mut self, wait: Duration) {
        self.dequeued += 1;
        if wait <= self.target_wait {
            self.dequeued_within_target += 1;
        }
        self.queue_wait_duration.record(wait.as_secs_f64());
    }

    pub fn record_completed(&mut self, processing_time: Duration, now: Instant) {
        self.completed += 1;
        self.completed_total.increment(1);
        self.processing_duration.record(processing_time.as_secs_f64());

        let sample = processing_time.as_secs_f64() * 1000.0;
        let alpha = self.config.ema_alpha;
        self.avg_processing_ms = Some(match self.avg_processing_ms {
            Some(avg) => alpha * sample + (1.0 - alpha) * avg,
            None => sample,
        });

        self.completions.push_back(now);
        self.prune(now);
    }

    /// Terminal failure only; retried attempts go through `record_retry`
    pub fn record_failed(&mut self) {
        self.failed += 1;
        self.failed_total.increment(1);
    }

    pub fn record_cancelled(&mut self) {
        self.cancelled += 1;
        self.cancelled_total.increment(1);
    }

    pub fn record_retry(&mut self) {
        self.retried += 1;
        self.retries_total.increment(1);
    }

    pub fn record_strategy_switch(&mut self) {
        self.strategy_switches += 1;
        self.strategy_switches_total.increment(1);
    }

    pub fn update_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as f64);
    }

    pub fn update_active_workers(&self, count: usize) {
        self.active_workers.set(count as f64);
    }

    /// 在目标等待时间内出队的比例，尚无出队记录时为 1.0
    pub fn queue_efficiency(&self) -> f64 {
        if self.dequeued == 0 {
            return 1.0;
        }
        self.dequeued_within_target as f64 / self.dequeued as f64
    }

    /// 滑动窗口内每分钟完成的任务数
    pub fn throughput_per_minute(&self, now: Instant) -> f64 {
        let window = self.config.throughput_window();
        let recent = self
            .completions
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= window)
            .count();
        recent as f64 * 60.0 / window.as_secs_f64()
    }

    /// 平均处理时间（指数移动平均），尚无样本时为 `None`
    pub fn avg_processing_time(&self) -> Option<Duration> {
        self.avg_processing_ms
            .map(|ms| Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64))
    }

    pub fn snapshot(&self, active_workers: usize, now: Instant) -> ProcessingStats {
        let completion_rate = if self.submitted == 0 {
            0.0
        } else {
            self.completed as f64 / self.submitted as f64
        };

        ProcessingStats {
            total: self.submitted,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            retried: self.retried,
            active_workers,
            avg_processing_time: self.avg_processing_time().unwrap_or_default(),
            throughput_per_minute: self.throughput_per_minute(now),
            completion_rate,
            strategy_switches: self.strategy_switches,
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.config.throughput_window();
        while let Some(front) = self.completions.front() {
            if now.saturating_duration_since(*front) > window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> StatsCollector {
        StatsCollector::new(
            StatsConfig {
                throughput_window_seconds: 60,
                ema_alpha: 0.5,
            },
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_empty_collector() {
        let stats = collector();
        assert_eq!(stats.queue_efficiency(), 1.0);
        assert!(stats.avg_processing_time().is_none());

        let snapshot = stats.snapshot(0, Instant::now());
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.completion_rate, 0.0);
        assert_eq!(snapshot.throughput_per_minute, 0.0);
        assert_eq!(snapshot.avg_processing_time, Duration::ZERO);
    }

    #[test]
    fn test_queue_efficiency() {
        let mut stats = collector();
        stats.record_dequeued(Duration::from_millis(10));
        stats.record_dequeued(Duration::from_millis(100));
        stats.record_dequeued(Duration::from_millis(500));
        stats.record_dequeued(Duration::from_secs(3));
        assert!((stats.queue_efficiency() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ema_processing_time() {
        let mut stats = collector();
        let now = Instant::now();
        stats.record_completed(Duration::from_millis(100), now);
        assert_eq!(stats.avg_processing_time(), Some(Duration::from_millis(100)));

        stats.record_completed(Duration::from_millis(300), now);
        assert_eq!(stats.avg_processing_time(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_throughput_window() {
        let mut stats = collector();
        let start = Instant::now();
        stats.record_completed(Duration::from_millis(1), start);
        stats.record_completed(Duration::from_millis(1), start);
        stats.record_completed(Duration::from_millis(1), start + Duration::from_secs(30));

        assert_eq!(stats.throughput_per_minute(start + Duration::from_secs(30)), 3.0);
        assert_eq!(stats.throughput_per_minute(start + Duration::from_secs(80)), 1.0);
        assert_eq!(stats.throughput_per_minute(start + Duration::from_secs(200)), 0.0);
    }

    #[test]
    fn test_completion_rate() {
        let mut stats = collector();
        stats.record_submitted(4);
        stats.record_completed(Duration::from_millis(5), Instant::now());
        stats.record_failed();
        stats.record_cancelled();
        stats.record_retry();
        stats.record_strategy_switch();

        let snapshot = stats.snapshot(2, Instant::now());
        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.active_workers, 2);
        assert_eq!(snapshot.strategy_switches, 1);
        assert!((snapshot.completion_rate - 0.25).abs() < 1e-9);
    }
}
