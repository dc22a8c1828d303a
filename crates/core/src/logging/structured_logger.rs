//! Structured logging for engine lifecycle events
//!
//! Every task and worker lifecycle event goes through one function here so that
//! field names stay consistent across the dispatcher.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::models::{TaskPriority, TaskStatus};

pub struct EngineLogger;

impl EngineLogger {
    /// Log task submission
    pub fn log_task_submitted(task_id: &str, task_type: &str, priority: TaskPriority, deps: usize) {
        info!(
            event = "task_submitted",
            task.id = task_id,
            task.type = task_type,
            task.priority = %priority,
            task.dependencies = deps,
            "Task submitted"
        );
    }

    /// Log task assignment to a worker
    pub fn log_task_dispatched(task_id: &str, worker_id: &str, strategy: &str, attempt: u32) {
        info!(
            event = "task_dispatched",
            task.id = task_id,
            worker.id = worker_id,
            strategy = strategy,
            task.attempt = attempt,
            "Task dispatched to worker"
        );
    }

    pub fn log_task_completed(task_id: &str, worker_id: &str, duration: Duration) {
        info!(
            event = "task_completed",
            task.id = task_id,
            worker.id = worker_id,
            task.duration_ms = duration.as_millis() as u64,
            "Task completed"
        );
    }

    /// Log terminal task failure
    pub fn log_task_failed(task_id: &str, worker_id: Option<&str>, error_message: &str, retry_count: u32) {
        error!(
            event = "task_failed",
            task.id = task_id,
            worker.id = worker_id.unwrap_or("-"),
            task.retry_count = retry_count,
            error = error_message,
            "Task failed permanently"
        );
    }

    pub fn log_task_retry_scheduled(task_id: &str, retry_count: u32, max_retries: u32, delay: Duration) {
        warn!(
            event = "task_retry_scheduled",
            task.id = task_id,
            task.retry_count = retry_count,
            task.max_retries = max_retries,
            retry.delay_ms = delay.as_millis() as u64,
            "Task failed, retry scheduled"
        );
    }

    pub fn log_task_cancelled(task_id: &str, previous: TaskStatus) {
        info!(
            event = "task_cancelled",
            task.id = task_id,
            task.previous_status = %previous,
            "Task cancelled"
        );
    }

    pub fn log_cancel_requested(task_id: &str, worker_id: &str, grace: Duration) {
        info!(
            event = "task_cancel_requested",
            task.id = task_id,
            worker.id = worker_id,
            cancel.grace_ms = grace.as_millis() as u64,
            "Cancellation signalled to running task"
        );
    }

    pub fn log_cancel_timeout(task_id: &str, worker_id: &str) {
        warn!(
            event = "task_cancel_timeout",
            task.id = task_id,
            worker.id = worker_id,
            "Cancellation not acknowledged within grace period"
        );
    }

    /// Late results of tasks that were already finalized are discarded
    pub fn log_stale_report(task_id: &str, worker_id: &str) {
        debug!(
            event = "stale_report_discarded",
            task.id = task_id,
            worker.id = worker_id,
            "Discarding late report"
        );
    }

    pub fn log_workers_scaled(previous: usize, target: usize, removed_idle: usize, draining: usize) {
        info!(
            event = "workers_scaled",
            workers.previous = previous,
            workers.target = target,
            workers.removed_idle = removed_idle,
            workers.draining = draining,
            "Worker pool scaled"
        );
    }

    pub fn log_worker_removed(worker_id: &str, reason: &str) {
        info!(
            event = "worker_removed",
            worker.id = worker_id,
            reason = reason,
            "Worker removed from registry"
        );
    }

    pub fn log_worker_crashed(worker_id: &str, task_id: Option<&str>, reason: &str) {
        error!(
            event = "worker_crashed",
            worker.id = worker_id,
            task.id = task_id.unwrap_or("-"),
            reason = reason,
            "Worker crashed"
        );
    }

    pub fn log_strategy_changed(from: &str, to: &str) {
        info!(
            event = "strategy_changed",
            strategy.from = from,
            strategy.to = to,
            "Load balancing strategy changed"
        );
    }

    /// Log an adaptive sub-strategy switch
    pub fn log_strategy_switched(from: &str, to: &str, worker_id: Option<&str>, success_rate: Option<f64>) {
        warn!(
            event = "strategy_switched",
            strategy.from = from,
            strategy.to = to,
            worker.id = worker_id.unwrap_or("-"),
            worker.success_rate = success_rate.unwrap_or(1.0),
            "Adaptive strategy switched"
        );
    }

    pub fn log_engine_started(workers: usize, strategy: &str) {
        info!(
            event = "engine_started",
            workers = workers,
            strategy = strategy,
            "Task engine started"
        );
    }

    pub fn log_engine_stopped(in_flight_aborted: usize) {
        info!(
            event = "engine_stopped",
            in_flight_aborted = in_flight_aborted,
            "Task engine stopped"
        );
    }
}
