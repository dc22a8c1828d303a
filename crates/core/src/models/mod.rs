//! # 数据模型
//!
//! 引擎的核心数据结构：任务记录、Worker执行槽位以及各类只读快照。
//!
//! ## 核心模型
//!
//! ### TaskRecord - 任务记录
//! 一个可调度的工作单元，携带不透明的负载、优先级、依赖集合和重试计数。
//! 状态只由调度循环推进，完整的状态机见 [`TaskStatus`]。
//!
//! ### WorkerHandle - 执行槽位
//! 最多同时执行 `capacity` 个任务，维护滚动延迟与成功率，供负载均衡策略使用。
//!
//! ### 快照
//! [`QueueSnapshot`]、[`ProcessingStats`]、[`WorkerPoolStatus`] 都是按需生成的
//! 一致性视图，调用方拿到的是副本，不会影响引擎状态。
//!
//! ## 使用示例
//!
//! ```rust
//! use engine_core::models::{TaskPriority, TaskRecord, TaskSpec, TaskStatus};
//! use serde_json::json;
//!
//! let spec = TaskSpec::new("sentiment", json!({"document_id": 42}))
//!     .with_priority(TaskPriority::High);
//! let task = TaskRecord::from_spec("task-1".to_string(), spec, 3);
//!
//! assert_eq!(task.status, TaskStatus::Pending);
//! assert_eq!(task.max_retries, 3);
//! ```

pub mod stats;
pub mod task;
pub mod worker;

pub use stats::*;
pub use task::*;
pub use worker::*;
