//! 内置的模拟分析执行器
//!
//! 真实的分析器（情感、质量、风险、漂移）由宿主服务提供。二进制只注册
//! 模拟实现，用来在没有外部依赖时演练调度、取消和进度上报。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use engine_core::{
    traits::{ExecutionContext, TaskExecutor},
    ExecutorRegistry, SchedulerError, SchedulerResult,
};
use serde_json::{json, Value};
use tracing::debug;

/// 内置分析类型
pub const ANALYSIS_TYPES: [&str; 4] = ["sentiment", "quality", "risk", "drift"];

/// 分步"执行"的模拟分析器
///
/// 每一步休眠 `step` 并上报进度。负载中的 `steps` 字段可以覆盖默认步数，
/// `fail` 为 true 时在最后一步返回执行错误。
pub struct SimulatedAnalyzer {
    name: String,
    step: Duration,
    steps: u32,
}

impl SimulatedAnalyzer {
    pub fn new<S: Into<String>>(name: S, step: Duration, steps: u32) -> Self {
        Self {
            name: name.into(),
            step,
            steps: steps.max(1),
        }
    }

    fn steps_for(&self, payload: &Value) -> u32 {
        payload
            .get("steps")
            .and_then(Value::as_u64)
            .map(|steps| steps.clamp(1, 1_000) as u32)
            .unwrap_or(self.steps)
    }
}

#[async_trait]
impl TaskExecutor for SimulatedAnalyzer {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<Value> {
        let steps = self.steps_for(&context.payload);

        for step in 1..=steps {
            tokio::select! {
                _ = context.cancelled() => {
                    debug!("任务 {} 在第 {} 步被取消", context.task_id, step);
                    return Err(SchedulerError::Cancelled);
                }
                _ = tokio::time::sleep(self.step) => {
                    context.report_progress(f64::from(step) / f64::from(steps));
                }
            }
        }

        if context.payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(SchedulerError::execution(format!(
                "{} 分析失败: 输入被标记为失败",
                self.name
            )));
        }

        Ok(json!({
            "analyzer": self.name,
            "worker_id": context.worker_id,
            "attempt": context.attempt,
            "steps": steps,
            "input": context.payload,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_task_type(&self, task_type: &str) -> bool {
        task_type == self.name
    }
}

/// 创建注册了全部模拟分析器的注册表
pub async fn simulated_registry(step: Duration, steps: u32) -> ExecutorRegistry {
    let registry = ExecutorRegistry::new();
    for analysis_type in ANALYSIS_TYPES {
        registry
            .register(
                analysis_type,
                Arc::new(SimulatedAnalyzer::new(analysis_type, step, steps)),
            )
            .await;
    }
    registry
}
