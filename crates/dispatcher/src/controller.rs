use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use engine_core::{
    config::AppConfig,
    logging::EngineLogger,
    models::{
        ProcessingStats, QueueSnapshot, ScaleResult, StrategyInfo, TaskPriority, TaskSpec,
        TaskStatusView, WorkerPoolStatus,
    },
    traits::TaskExecutor,
    SchedulerError, SchedulerResult,
};

use crate::scheduler::{Command, Scheduler};

struct RunningEngine {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// 任务处理引擎
///
/// 对外的唯一入口。所有操作都转发给调度循环并等待其回复，
/// 因此可以在任意多个任务中并发调用。引擎未启动或已停止时
/// 返回 [`SchedulerError::EngineNotRunning`]。
///
/// ```no_run
/// # use std::sync::Arc;
/// # use engine_core::{AppConfig, ExecutorRegistry, models::TaskPriority};
/// # use engine_dispatcher::TaskEngine;
/// # async fn demo() -> engine_core::SchedulerResult<()> {
/// let engine = TaskEngine::new(AppConfig::default(), Arc::new(ExecutorRegistry::new()));
/// engine.start().await?;
/// let task_id = engine
///     .submit_task("sentiment", serde_json::json!({"text": "..."}), TaskPriority::High, vec![])
///     .await?;
/// let status = engine.get_task_status(&task_id).await?;
/// println!("{}: {}", task_id, status.status);
/// engine.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct TaskEngine {
    config: AppConfig,
    executor: Arc<dyn TaskExecutor>,
    running: Mutex<Option<RunningEngine>>,
}

impl TaskEngine {
    pub fn new(config: AppConfig, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            config,
            executor,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// 启动调度循环并注册初始Worker
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::EngineAlreadyRunning);
        }

        self.config
            .validate()
            .map_err(|e| SchedulerError::config_error(format!("{e:#}")))?;

        let scheduler = Scheduler::new(&self.config, Arc::clone(&self.executor))?;
        EngineLogger::log_engine_started(scheduler.worker_count(), scheduler.strategy_name());

        let (commands, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(scheduler.run(receiver));
        *running = Some(RunningEngine { commands, handle });
        Ok(())
    }

    /// 停止引擎
    ///
    /// 不再分配新任务，等待执行中的任务结束；超过 `shutdown_timeout_seconds`
    /// 仍未结束的执行会被取消并中止。
    pub async fn stop(&self) -> SchedulerResult<()> {
        let Some(engine) = self.running.lock().await.take() else {
            return Err(SchedulerError::EngineNotRunning);
        };
        let RunningEngine { commands, handle } = engine;

        let (drain_tx, drain_rx) = oneshot::channel();
        if commands.send(Command::Drain { reply: drain_tx }).is_err() {
            warn!("调度循环已提前退出");
            return Ok(());
        }

        let shutdown_timeout = self.config.engine.shutdown_timeout();
        let aborted = match tokio::time::timeout(shutdown_timeout, drain_rx).await {
            Ok(_) => 0,
            Err(_) => {
                warn!(
                    "等待执行中的任务超时 ({:?})，取消剩余任务",
                    shutdown_timeout
                );
                let (abort_tx, abort_rx) = oneshot::channel();
                match commands.send(Command::Abort { reply: abort_tx }) {
                    Ok(()) => abort_rx.await.unwrap_or(0),
                    Err(_) => 0,
                }
            }
        };

        drop(commands);
        if let Err(e) = handle.await {
            error!("调度循环异常退出: {}", e);
        }
        EngineLogger::log_engine_stopped(aborted);
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SchedulerResult<T> {
        let commands = {
            let running = self.running.lock().await;
            match running.as_ref() {
                Some(engine) => engine.commands.clone(),
                None => return Err(SchedulerError::EngineNotRunning),
            }
        };

        let (reply, response) = oneshot::channel();
        commands
            .send(build(reply))
            .map_err(|_| SchedulerError::EngineNotRunning)?;
        response.await.map_err(|_| SchedulerError::EngineNotRunning)
    }

    /// 提交单个任务，返回任务ID
    pub async fn submit_task(
        &self,
        task_type: &str,
        payload: Value,
        priority: TaskPriority,
        dependencies: Vec<String>,
    ) -> SchedulerResult<String> {
        let spec = TaskSpec::new(task_type, payload)
            .with_priority(priority)
            .with_dependencies(dependencies);
        self.submit_spec(spec).await
    }

    pub async fn submit_spec(&self, spec: TaskSpec) -> SchedulerResult<String> {
        let mut ids = self.submit_batch(vec![spec]).await?;
        ids.pop()
            .ok_or_else(|| SchedulerError::Internal("提交未返回任务ID".to_string()))
    }

    /// 批量提交，全部成功或全部拒绝
    pub async fn submit_batch(&self, specs: Vec<TaskSpec>) -> SchedulerResult<Vec<String>> {
        let count = specs.len();
        let ids = self
            .request(|reply| Command::Submit { specs, reply })
            .await??;
        if count > 1 {
            info!("批量提交 {} 个任务", count);
        }
        Ok(ids)
    }

    pub async fn get_task_status(&self, task_id: &str) -> SchedulerResult<TaskStatusView> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::TaskStatus { task_id, reply })
            .await?
    }

    /// 取消任务，任务已处于终止状态时返回 `false`
    pub async fn cancel_task(&self, task_id: &str) -> SchedulerResult<bool> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Cancel { task_id, reply })
            .await?
    }

    pub async fn get_worker_status(&self) -> SchedulerResult<WorkerPoolStatus> {
        self.request(|reply| Command::WorkerStatus { reply }).await
    }

    pub async fn scale_workers(&self, target: usize) -> SchedulerResult<ScaleResult> {
        self.request(|reply| Command::Scale { target, reply })
            .await?
    }

    /// 移除指定Worker，忙碌的Worker在当前任务结束后移除
    pub async fn remove_worker(&self, worker_id: &str) -> SchedulerResult<()> {
        let worker_id = worker_id.to_string();
        self.request(|reply| Command::RemoveWorker { worker_id, reply })
            .await?
    }

    pub async fn set_load_balancing_strategy(&self, name: &str) -> SchedulerResult<StrategyInfo> {
        let name = name.to_string();
        self.request(|reply| Command::SetStrategy { name, reply })
            .await?
    }

    pub async fn get_load_balancing_strategy(&self) -> SchedulerResult<StrategyInfo> {
        self.request(|reply| Command::GetStrategy { reply }).await
    }

    pub async fn get_queue_status(&self) -> SchedulerResult<QueueSnapshot> {
        self.request(|reply| Command::QueueStatus { reply }).await
    }

    pub async fn get_processing_stats(&self) -> SchedulerResult<ProcessingStats> {
        self.request(|reply| Command::ProcessingStats { reply })
            .await
    }

    /// 清理完成时间早于 `retention` 的终止任务，返回清理数量
    pub async fn cleanup_finished_tasks(&self, retention: Duration) -> SchedulerResult<usize> {
        self.request(|reply| Command::Cleanup { retention, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::ExecutorRegistry;
    use serde_json::json;

    fn engine() -> TaskEngine {
        let mut config = AppConfig::default();
        config.engine.initial_workers = 0;
        TaskEngine::new(config, Arc::new(ExecutorRegistry::new()))
    }

    #[tokio::test]
    async fn test_operations_require_running_engine() {
        let engine = engine();
        assert!(!engine.is_running().await);

        let err = engine
            .submit_task("a", json!({}), TaskPriority::Normal, vec![])
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::EngineNotRunning);
        assert_eq!(
            engine.get_queue_status().await.unwrap_err(),
            SchedulerError::EngineNotRunning
        );
        assert_eq!(engine.stop().await.unwrap_err(), SchedulerError::EngineNotRunning);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let engine = engine();
        engine.start().await.unwrap();
        assert!(engine.is_running().await);
        assert_eq!(
            engine.start().await.unwrap_err(),
            SchedulerError::EngineAlreadyRunning
        );

        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);

        // 停止后可以重新启动
        engine.start().await.unwrap();
        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_on_start() {
        let mut config = AppConfig::default();
        config.load_balancer.strategy = "fastest".to_string();
        let engine = TaskEngine::new(config, Arc::new(ExecutorRegistry::new()));

        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Configuration(_)));
        assert!(!engine.is_running().await);
    }
}
