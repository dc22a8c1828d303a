pub mod config;
pub mod errors;
pub mod executor_registry;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::{ErrorKind, SchedulerError};
pub use executor_registry::ExecutorRegistry;
pub use logging::{init_logging, EngineLogger};
pub use models::{
    ProcessingStats, QueueSnapshot, ScaleResult, StrategyInfo, TaskPriority, TaskRecord,
    TaskSpec, TaskStatus, TaskStatusView, WorkerHandle, WorkerPoolStatus, WorkerStatus,
};
pub use traits::{ExecutionContext, TaskDispatchStrategy, TaskExecutor};

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
