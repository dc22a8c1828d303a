//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use std::time::Duration;

use chrono::{DateTime, Utc};
use engine_core::models::{
    TaskErrorKind, TaskPriority, TaskRecord, TaskSpec, TaskStatus, WorkerHandle, WorkerStatus,
};

/// Builder for task submissions
pub struct TaskSpecBuilder {
    spec: TaskSpec,
}

impl TaskSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: TaskSpec::new("test_analysis", serde_json::json!({})),
        }
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.spec.task_type = task_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.spec.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.spec.dependencies = dependencies;
        self
    }

    pub fn depends_on(mut self, task_id: &str) -> Self {
        self.spec.dependencies.push(task_id.to_string());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.spec.max_retries = Some(max_retries);
        self
    }

    pub fn build(self) -> TaskSpec {
        self.spec
    }
}

impl Default for TaskSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for task records, for tests that work below the engine
pub struct TaskRecordBuilder {
    task: TaskRecord,
}

impl TaskRecordBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            task: TaskRecord::from_spec(id.to_string(), TaskSpecBuilder::new().build(), 3),
        }
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.task.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_retries(mut self, retry_count: u32, max_retries: u32) -> Self {
        self.task.retry_count = retry_count;
        self.task.max_retries = max_retries;
        self
    }

    /// Walk the task through the state machine so the history stays valid
    pub fn running_on(mut self, worker_id: &str, started_at: DateTime<Utc>) -> Self {
        for status in [TaskStatus::Ready, TaskStatus::Assigned, TaskStatus::Running] {
            self.task
                .transition(status)
                .expect("builder transition should be valid");
        }
        self.task.assigned_worker = Some(worker_id.to_string());
        self.task.started_at = Some(started_at);
        self
    }

    pub fn completed_after(mut self, duration: Duration) -> Self {
        let started_at = self.task.started_at.unwrap_or_else(Utc::now);
        if self.task.status != TaskStatus::Running {
            self = self.running_on("worker-001", started_at);
        }
        self.task
            .transition(TaskStatus::Completed)
            .expect("builder transition should be valid");
        self.task.assigned_worker = None;
        self.task.progress = 1.0;
        self.task.completed_at =
            Some(started_at + chrono::Duration::from_std(duration).unwrap_or_default());
        self
    }

    pub fn failed_with(mut self, message: &str) -> Self {
        if self.task.status != TaskStatus::Running {
            self = self.running_on("worker-001", Utc::now());
        }
        self.task
            .transition(TaskStatus::Failed)
            .expect("builder transition should be valid");
        self.task.assigned_worker = None;
        self.task.error_message = Some(message.to_string());
        self.task.error_kind = Some(TaskErrorKind::Execution);
        self.task.completed_at = Some(Utc::now());
        self
    }

    pub fn build(self) -> TaskRecord {
        self.task
    }
}

/// Builder for worker handles with a prepared performance history
pub struct WorkerHandleBuilder {
    worker: WorkerHandle,
}

impl WorkerHandleBuilder {
    pub fn new(seq: u64) -> Self {
        Self {
            worker: WorkerHandle::new(seq, 1, 20),
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.worker.capacity = capacity;
        self
    }

    pub fn with_stats_window(mut self, window: usize) -> Self {
        let mut worker = WorkerHandle::new(self.worker.seq, self.worker.capacity, window);
        worker.status = self.worker.status;
        worker.current_task_ids = std::mem::take(&mut self.worker.current_task_ids);
        self.worker = worker;
        self
    }

    pub fn busy_with(mut self, task_id: &str) -> Self {
        self.worker.assign(task_id);
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.worker.status = status;
        self
    }

    pub fn with_heartbeat(mut self, at: DateTime<Utc>) -> Self {
        self.worker.touch_heartbeat(at);
        self
    }

    pub fn with_successes(mut self, count: usize, latency: Duration) -> Self {
        for _ in 0..count {
            self.worker.stats.record(true, latency);
        }
        self
    }

    pub fn with_failures(mut self, count: usize, latency: Duration) -> Self {
        for _ in 0..count {
            self.worker.stats.record(false, latency);
        }
        self
    }

    pub fn build(self) -> WorkerHandle {
        self.worker
    }
}
