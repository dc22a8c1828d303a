//! 任务执行钩子接口定义
//!
//! 引擎本身不执行任务内容，只负责把任务分派给 [`TaskExecutor`] 并等待结果。
//!
//! ## 核心概念
//!
//! ### TaskExecutor
//! 实际执行任务的外部组件。一次执行最终返回结果或错误，期间可以通过
//! [`ExecutionContext`] 上报进度、感知取消请求。
//!
//! ### 取消
//! 调度器持有 [`CancellationHandle`]，执行钩子持有 [`CancellationSignal`]。
//! 取消是协作式的：钩子收到信号后应尽快返回（通常返回 `SchedulerError::Cancelled`），
//! 在宽限期内返回即视为确认取消。
//!
//! ## 使用示例
//!
//! ```rust
//! use async_trait::async_trait;
//! use engine_core::traits::{ExecutionContext, TaskExecutor};
//! use engine_core::{SchedulerError, SchedulerResult};
//!
//! pub struct SentimentExecutor;
//!
//! #[async_trait]
//! impl TaskExecutor for SentimentExecutor {
//!     async fn execute(&self, context: ExecutionContext) -> SchedulerResult<serde_json::Value> {
//!         tokio::select! {
//!             _ = context.cancelled() => Err(SchedulerError::Cancelled),
//!             _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {
//!                 context.report_progress(1.0);
//!                 Ok(serde_json::json!({"score": 0.7}))
//!             }
//!         }
//!     }
//!
//!     fn name(&self) -> &str {
//!         "sentiment"
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::SchedulerResult;

/// 调度器一侧的取消句柄
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    sender: Arc<watch::Sender<bool>>,
}

/// 执行钩子一侧的取消信号
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

/// 创建一对关联的取消句柄与信号
pub fn cancellation_pair() -> (CancellationHandle, CancellationSignal) {
    let (sender, receiver) = watch::channel(false);
    (
        CancellationHandle {
            sender: Arc::new(sender),
        },
        CancellationSignal { receiver },
    )
}

impl CancellationHandle {
    pub fn cancel(&self) {
        // 接收方全部丢弃时发送失败，执行已经结束，无需处理
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl CancellationSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// 等待取消请求。句柄被丢弃（引擎已停止）同样视为取消。
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

/// 进度上报器
///
/// 进度被截断到 `[0, 1]` 后送回调度循环。
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, progress: f64) {
        if progress.is_nan() {
            return;
        }
        (self.sink)(progress.clamp(0.0, 1.0));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// 任务执行上下文
///
/// # 字段说明
///
/// * `task_id` - 任务ID
/// * `task_type` - 任务类型，用于路由到具体执行钩子
/// * `payload` - 不透明的任务负载，引擎不解析其内容
/// * `worker_id` - 执行该任务的Worker
/// * `attempt` - 第几次执行，从1开始
/// * `deadline` - 执行截止时间，超时由执行钩子自行处理
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task_id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub worker_id: String,
    pub attempt: u32,
    pub deadline: DateTime<Utc>,
    cancellation: CancellationSignal,
    progress: ProgressReporter,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        task_type: String,
        payload: serde_json::Value,
        worker_id: String,
        attempt: u32,
        deadline: DateTime<Utc>,
        cancellation: CancellationSignal,
        progress: ProgressReporter,
    ) -> Self {
        Self {
            task_id,
            task_type,
            payload,
            worker_id,
            attempt,
            deadline,
            cancellation,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation(&self) -> CancellationSignal {
        self.cancellation.clone()
    }

    pub fn report_progress(&self, progress: f64) {
        self.progress.report(progress);
    }

    /// 距离截止时间的剩余时长，已过期时为零
    pub fn remaining(&self) -> std::time::Duration {
        (self.deadline - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// 任务执行钩子接口
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行任务，返回不透明的结果
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<serde_json::Value>;

    /// 执行器名称
    fn name(&self) -> &str;

    /// 是否支持指定的任务类型
    fn supports_task_type(&self, _task_type: &str) -> bool {
        true
    }
}
