use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use engine_core::models::WorkerHandle;

/// Worker失效检测
///
/// 执行中的Worker会周期性上报心跳；心跳超过 `heartbeat_timeout`
/// 未更新的Worker被判定为失效。空闲Worker没有执行中的任务，不参与检测。
#[derive(Debug, Clone)]
pub struct WorkerFailureDetector {
    heartbeat_timeout: Duration,
}

impl WorkerFailureDetector {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self { heartbeat_timeout }
    }

    /// 检查Worker是否失效
    pub fn is_worker_failed(&self, worker: &WorkerHandle, now: DateTime<Utc>) -> bool {
        worker.has_task() && worker.is_heartbeat_expired(self.heartbeat_timeout, now)
    }

    /// 检测失效的Worker，返回其ID
    pub fn detect_failed_workers<'a, I>(&self, workers: I, now: DateTime<Utc>) -> Vec<String>
    where
        I: IntoIterator<Item = &'a WorkerHandle>,
    {
        workers
            .into_iter()
            .filter(|worker| self.is_worker_failed(worker, now))
            .map(|worker| {
                warn!(
                    "检测到失效Worker: {} (上次心跳: {})",
                    worker.id,
                    worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
                );
                worker.id.clone()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_only_busy_workers_with_stale_heartbeat() {
        let detector = WorkerFailureDetector::new(Duration::from_secs(10));
        let now = Utc::now();
        let stale = now - chrono::Duration::seconds(30);

        let mut busy_stale = WorkerHandle::new(1, 1, 5);
        busy_stale.assign("t1");
        busy_stale.touch_heartbeat(stale);

        let mut busy_fresh = WorkerHandle::new(2, 1, 5);
        busy_fresh.assign("t2");
        busy_fresh.touch_heartbeat(now);

        let mut idle_stale = WorkerHandle::new(3, 1, 5);
        idle_stale.touch_heartbeat(stale);

        let mut draining_stale = WorkerHandle::new(4, 1, 5);
        draining_stale.assign("t4");
        draining_stale.mark_draining();
        draining_stale.touch_heartbeat(stale);

        let workers = [busy_stale, busy_fresh, idle_stale, draining_stale];
        let failed = detector.detect_failed_workers(workers.iter(), now);
        assert_eq!(failed, vec!["worker-001", "worker-004"]);
    }
}
