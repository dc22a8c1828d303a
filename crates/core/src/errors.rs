use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 引擎错误类型定义
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SchedulerError {
    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("未知的负载均衡策略: {name}")]
    UnknownStrategy { name: String },

    #[error("无效的任务优先级: {0}")]
    InvalidPriority(String),

    #[error("任务依赖不存在: {dependency}")]
    UnknownDependency { dependency: String },

    #[error("任务依赖 {dependency} 已处于终止状态，无法再完成")]
    UnsatisfiableDependency { dependency: String },

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("任务队列已满，容量: {capacity}")]
    QueueFull { capacity: usize },

    #[error("Worker数量 {requested} 超出允许范围 [{min}, {max}]")]
    WorkerLimit {
        requested: usize,
        min: usize,
        max: usize,
    },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时: {0}")]
    ExecutionTimeout(String),

    #[error("任务已被取消")]
    Cancelled,

    #[error("引擎未运行")]
    EngineNotRunning,

    #[error("引擎已在运行")]
    EngineAlreadyRunning,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// 同步拒绝，任务不会入队
    Validation,
    /// Worker上报的执行失败，驱动重试策略
    Execution,
    /// 取消确认超时或执行钩子自身超时
    Timeout,
    /// Worker数量或队列容量越界
    Capacity,
    /// 引擎生命周期错误
    Lifecycle,
    Internal,
}

impl SchedulerError {
    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn worker_not_found<S: Into<String>>(id: S) -> Self {
        Self::WorkerNotFound { id: id.into() }
    }

    pub fn execution<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::ExecutionTimeout(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TaskNotFound { .. }
            | Self::WorkerNotFound { .. }
            | Self::UnknownStrategy { .. }
            | Self::InvalidPriority(_)
            | Self::UnknownDependency { .. }
            | Self::UnsatisfiableDependency { .. }
            | Self::InvalidTaskParams(_) => ErrorKind::Validation,
            Self::QueueFull { .. } | Self::WorkerLimit { .. } => ErrorKind::Capacity,
            Self::TaskExecution(_) | Self::Cancelled => ErrorKind::Execution,
            Self::ExecutionTimeout(_) => ErrorKind::Timeout,
            Self::EngineNotRunning | Self::EngineAlreadyRunning => ErrorKind::Lifecycle,
            Self::Configuration(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Execution | ErrorKind::Timeout)
            && !matches!(self, Self::Cancelled)
    }

    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::InvalidTaskParams(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
