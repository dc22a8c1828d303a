//! Test helper utilities and common testing patterns
//!
//! This module provides utilities for setting up engines with fast timings
//! and for waiting on asynchronous state changes.

use std::sync::Arc;
use std::time::Duration;

use engine_core::{
    config::AppConfig,
    models::{TaskStatus, TaskStatusView},
    traits::TaskExecutor,
};
use engine_dispatcher::TaskEngine;
use tokio::time::{sleep, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// Configuration with timings short enough for tests
    pub fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.initial_workers = 2;
        config.engine.max_workers = 16;
        config.engine.cancel_grace_period_ms = 200;
        config.engine.heartbeat_interval_ms = 20;
        config.engine.heartbeat_timeout_ms = 2_000;
        config.engine.failure_check_interval_ms = 50;
        config.engine.shutdown_timeout_seconds = 5;
        config.retry.base_delay_ms = 20;
        config.retry.max_delay_ms = 500;
        config.retry.backoff_multiplier = 2.0;
        config.retry.jitter_factor = 0.0;
        config
    }

    pub fn config_with_workers(workers: usize) -> AppConfig {
        let mut config = Self::config();
        config.engine.initial_workers = workers;
        config
    }

    /// Build and start an engine
    pub async fn start_engine(config: AppConfig, executor: Arc<dyn TaskExecutor>) -> TaskEngine {
        let engine = TaskEngine::new(config, executor);
        engine.start().await.expect("engine should start");
        engine
    }

    /// Wait for a condition to be true with timeout
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition().await {
                return true;
            }
            sleep(POLL_INTERVAL).await;
        }
        false
    }

    /// Set up logging for tests (call once per test binary)
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

/// Poll a task until it reaches `expected`, panicking after `timeout`
pub async fn wait_for_status(
    engine: &TaskEngine,
    task_id: &str,
    expected: TaskStatus,
    timeout: Duration,
) -> TaskStatusView {
    wait_for_task(engine, task_id, timeout, |view| view.status == expected)
        .await
        .unwrap_or_else(|last| {
            panic!(
                "task {} did not reach {} within {:?}, last status {:?}",
                task_id, expected, timeout, last
            )
        })
}

/// Poll a task until it reaches any terminal status
pub async fn wait_for_terminal(
    engine: &TaskEngine,
    task_id: &str,
    timeout: Duration,
) -> TaskStatusView {
    wait_for_task(engine, task_id, timeout, |view| view.status.is_terminal())
        .await
        .unwrap_or_else(|last| {
            panic!(
                "task {} did not finish within {:?}, last status {:?}",
                task_id, timeout, last
            )
        })
}

async fn wait_for_task<P>(
    engine: &TaskEngine,
    task_id: &str,
    timeout: Duration,
    predicate: P,
) -> Result<TaskStatusView, Option<TaskStatus>>
where
    P: Fn(&TaskStatusView) -> bool,
{
    let deadline = Instant::now() + timeout;
    let mut last = None;
    loop {
        if let Ok(view) = engine.get_task_status(task_id).await {
            if predicate(&view) {
                return Ok(view);
            }
            last = Some(view.status);
        }
        if Instant::now() >= deadline {
            return Err(last);
        }
        sleep(POLL_INTERVAL).await;
    }
}
