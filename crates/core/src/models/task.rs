use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SchedulerError, SchedulerResult};

/// 任务优先级
///
/// 决定出队顺序，不会抢占已在运行的任务。`rank` 越小越先出队。
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Critical,
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ];

    pub fn rank(self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskPriority::Critical => "critical",
            TaskPriority::High => "high",
            TaskPriority::Normal => "normal",
            TaskPriority::Low => "low",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(TaskPriority::Critical),
            "high" => Ok(TaskPriority::High),
            "normal" => Ok(TaskPriority::Normal),
            "low" => Ok(TaskPriority::Low),
            _ => Err(SchedulerError::InvalidPriority(s.to_string())),
        }
    }
}

/// 任务状态
///
/// ```text
/// Pending → Ready → Assigned → Running → Completed
///    ↑                  ↓         ↓
///    └──── Failed ←─────┴─────────┘
///                  Cancelled
/// ```
///
/// `Failed → Pending` 仅在仍有重试次数时发生；依赖终止失败时 `Pending → Failed`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Ready,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// 等待调度（在队列中或处于重试退避中）
    pub fn is_waiting(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Ready)
    }

    /// 已分派给Worker
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Ready, Assigned)
                | (Ready, Cancelled)
                | (Assigned, Running)
                | (Assigned, Failed)
                | (Assigned, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Ready => "ready",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 记录在任务上的错误标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskErrorKind {
    Execution,
    Timeout,
}

impl TaskErrorKind {
    pub fn from_error(error: &SchedulerError) -> Self {
        match error.kind() {
            crate::ErrorKind::Timeout => TaskErrorKind::Timeout,
            _ => TaskErrorKind::Execution,
        }
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 为空时使用引擎默认值
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new<S: Into<String>>(task_type: S, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::Normal,
            dependencies: Vec::new(),
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.task_type.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskParams(
                "任务类型不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 任务记录
///
/// 一个可调度的工作单元。只有调度循环会修改状态、进度和分配的Worker，
/// 结果、错误与完成时间只由Worker完成路径写入。
///
/// # 不变式
///
/// - `assigned_worker` 非空当且仅当状态为 `Assigned` 或 `Running`
/// - `completed_at` 非空当且仅当状态为终止状态
/// - `retry_count` 不超过 `max_retries`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub dependencies: BTreeSet<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_worker: Option<String>,
    pub error_message: Option<String>,
    pub error_kind: Option<TaskErrorKind>,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    /// 经历过的全部状态，首元素为 `Pending`
    pub status_history: Vec<TaskStatus>,
    /// 首次入队的序号，重试时沿用
    pub queue_seq: Option<u64>,
}

impl TaskRecord {
    pub fn from_spec(id: String, spec: TaskSpec, default_max_retries: u32) -> Self {
        Self {
            id,
            task_type: spec.task_type,
            payload: spec.payload,
            priority: spec.priority,
            status: TaskStatus::Pending,
            dependencies: spec.dependencies.into_iter().collect(),
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            assigned_worker: None,
            error_message: None,
            error_kind: None,
            progress: 0.0,
            result: None,
            status_history: vec![TaskStatus::Pending],
            queue_seq: None,
        }
    }

    /// 按状态机推进任务状态，非法转换返回内部错误且不修改任务
    pub fn transition(&mut self, next: TaskStatus) -> SchedulerResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::Internal(format!(
                "任务 {} 不允许从 {} 转换到 {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.status_history.push(next);
        Ok(())
    }

    pub fn has_dependencies(&self) -> bool {
        !self.dependencies.is_empty()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn has_passed_through(&self, status: TaskStatus) -> bool {
        self.status_history.contains(&status)
    }

    pub fn processing_time(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }
}

/// 任务状态查询结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: String,
    pub task_type: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_kind: Option<TaskErrorKind>,
    pub assigned_worker: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub status_history: Vec<TaskStatus>,
}

impl TaskStatusView {
    pub fn from_record(task: &TaskRecord, estimated_completion: Option<DateTime<Utc>>) -> Self {
        Self {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            priority: task.priority,
            status: task.status,
            progress: task.progress,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            error_message: task.error_message.clone(),
            error_kind: task.error_kind,
            assigned_worker: task.assigned_worker.clone(),
            retry_count: task.retry_count,
            max_retries: task.max_retries,
            estimated_completion,
            result: task.result.clone(),
            status_history: task.status_history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_parsing() {
        assert_eq!("critical".parse::<TaskPriority>().unwrap(), TaskPriority::Critical);
        assert_eq!(" HIGH ".parse::<TaskPriority>().unwrap(), TaskPriority::High);
        assert_eq!("low".parse::<TaskPriority>().unwrap(), TaskPriority::Low);

        let err = "urgent".parse::<TaskPriority>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_priority_rank_order() {
        let mut priorities = vec![
            TaskPriority::Low,
            TaskPriority::Critical,
            TaskPriority::Normal,
            TaskPriority::High,
        ];
        priorities.sort_by_key(|p| p.rank());
        assert_eq!(priorities, TaskPriority::ALL.to_vec());
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Assigned));
        assert!(Assigned.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Failed.can_transition_to(Pending));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Ready.can_transition_to(Completed));
        assert!(!Assigned.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Ready));
    }

    #[test]
    fn test_record_transition_tracks_history() {
        let spec = TaskSpec::new("sentiment", json!({"doc": 1}));
        let mut task = TaskRecord::from_spec("t-1".to_string(), spec, 3);

        task.transition(TaskStatus::Ready).unwrap();
        task.transition(TaskStatus::Assigned).unwrap();
        assert!(task.transition(TaskStatus::Completed).is_err());
        assert_eq!(task.status, TaskStatus::Assigned);

        assert!(!task.has_passed_through(TaskStatus::Running));

        task.transition(TaskStatus::Running).unwrap();
        task.transition(TaskStatus::Completed).unwrap();
        assert!(task.has_passed_through(TaskStatus::Running));
        assert!(!task.has_passed_through(TaskStatus::Failed));
        assert!(!task.has_dependencies());
        assert_eq!(
            task.status_history,
            vec![
                TaskStatus::Pending,
                TaskStatus::Ready,
                TaskStatus::Assigned,
                TaskStatus::Running,
                TaskStatus::Completed
            ]
        );
    }

    #[test]
    fn test_spec_defaults_and_validation() {
        let spec: TaskSpec = serde_json::from_value(json!({"task_type": "quality"})).unwrap();
        assert_eq!(spec.priority, TaskPriority::Normal);
        assert!(spec.dependencies.is_empty());
        assert!(spec.validate().is_ok());

        let task = TaskRecord::from_spec("t-2".to_string(), spec.clone(), 5);
        assert_eq!(task.max_retries, 5);

        let task = TaskRecord::from_spec("t-3".to_string(), spec.with_max_retries(1), 5);
        assert_eq!(task.max_retries, 1);

        assert!(TaskSpec::new("  ", json!(null)).validate().is_err());
    }
}
