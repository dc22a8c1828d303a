use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use engine_core::{
    config::AppConfig,
    models::{TaskPriority, TaskSpec},
    traits::TaskExecutor,
};
use engine_dispatcher::TaskEngine;
use serde_json::json;
use tokio::{sync::broadcast, time::MissedTickBehavior};
use tracing::{info, warn};

/// 应用运行参数（来自命令行）
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// 已结束任务的保留时长
    pub retention: Duration,
    /// 统计日志与清理的周期
    pub report_interval: Duration,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(3600),
            report_interval: Duration::from_secs(30),
        }
    }
}

/// 主应用程序
pub struct Application {
    engine: Arc<TaskEngine>,
    options: AppOptions,
}

impl Application {
    pub fn new(config: AppConfig, executor: Arc<dyn TaskExecutor>, options: AppOptions) -> Self {
        Self {
            engine: Arc::new(TaskEngine::new(config, executor)),
            options,
        }
    }

    pub fn engine(&self) -> Arc<TaskEngine> {
        Arc::clone(&self.engine)
    }

    /// 启动任务引擎
    pub async fn start(&self) -> Result<()> {
        self.engine.start().await.context("启动任务引擎失败")?;
        info!(
            "任务引擎已启动，保留时长 {:?}，统计周期 {:?}",
            self.options.retention, self.options.report_interval
        );
        Ok(())
    }

    /// 运行周期性维护直到收到关闭信号，然后停止引擎
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.options.report_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("应用收到关闭信号");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.housekeeping().await {
                        warn!("周期维护失败: {e}");
                    }
                }
            }
        }

        self.engine.stop().await.context("停止任务引擎失败")?;
        Ok(())
    }

    /// 输出统计并清理过期任务，返回清理的任务数
    pub async fn housekeeping(&self) -> Result<usize> {
        let stats = self.engine.get_processing_stats().await?;
        let queue = self.engine.get_queue_status().await?;
        info!(
            total = stats.total,
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            retried = stats.retried,
            active_workers = stats.active_workers,
            queue_length = queue.length,
            queue_efficiency = queue.queue_efficiency,
            throughput_per_minute = stats.throughput_per_minute,
            "处理统计"
        );

        let evicted = self
            .engine
            .cleanup_finished_tasks(self.options.retention)
            .await?;
        if evicted > 0 {
            info!("清理了 {} 个已结束的任务", evicted);
        }
        Ok(evicted)
    }

    /// 提交一组演示任务：两个独立分析，然后是依赖它们的风险与漂移分析
    pub async fn submit_demo_workload(&self, documents: usize) -> Result<Vec<String>> {
        let mut submitted = Vec::new();

        for document in 0..documents {
            let payload = json!({ "document_id": document, "steps": 5 });
            let first = self
                .engine
                .submit_batch(vec![
                    TaskSpec::new("quality", payload.clone()),
                    TaskSpec::new("sentiment", payload.clone())
                        .with_priority(TaskPriority::High),
                ])
                .await
                .context("提交演示任务失败")?;

            let risk = self
                .engine
                .submit_task("risk", payload.clone(), TaskPriority::Normal, first.clone())
                .await
                .context("提交演示任务失败")?;
            let drift = self
                .engine
                .submit_task("drift", payload, TaskPriority::Low, vec![risk.clone()])
                .await
                .context("提交演示任务失败")?;

            submitted.extend(first);
            submitted.push(risk);
            submitted.push(drift);
        }

        info!("已提交 {} 个演示任务", submitted.len());
        Ok(submitted)
    }
}
