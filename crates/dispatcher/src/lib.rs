//! 任务分派引擎
//!
//! 优先级队列、负载均衡策略、重试退避、Worker失效检测与处理统计，
//! 由 [`TaskEngine`] 统一对外提供。

pub mod controller;
pub mod queue;
pub mod retry_service;
mod scheduler;
pub mod stats;
pub mod strategies;
pub mod worker_failure_detector;

#[cfg(test)]
mod strategies_test;

pub use controller::TaskEngine;
pub use queue::{PriorityQueue, QueueEntry};
pub use retry_service::RetryPolicy;
pub use stats::StatsCollector;
pub use strategies::*;
pub use worker_failure_detector::WorkerFailureDetector;
