use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    traits::{ExecutionContext, TaskExecutor},
    SchedulerError, SchedulerResult,
};

/// 按任务类型路由的执行器注册表
///
/// 注册表本身也实现了 [`TaskExecutor`]，可以直接交给引擎作为执行钩子。
/// 查找顺序：先按任务类型精确匹配注册名，再依次询问各执行器的
/// `supports_task_type`（按注册名排序，保证结果确定）。
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: Arc<RwLock<HashMap<String, Arc<dyn TaskExecutor>>>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<S: Into<String>>(&self, task_type: S, executor: Arc<dyn TaskExecutor>) {
        let task_type = task_type.into();
        debug!("注册执行器 {} 处理任务类型 {}", executor.name(), task_type);
        self.executors.write().await.insert(task_type, executor);
    }

    pub async fn register_batch(&self, executors: Vec<(String, Arc<dyn TaskExecutor>)>) {
        let mut registry = self.executors.write().await;
        for (task_type, executor) in executors {
            registry.insert(task_type, executor);
        }
    }

    pub async fn unregister(&self, task_type: &str) -> bool {
        self.executors.write().await.remove(task_type).is_some()
    }

    pub async fn contains(&self, task_type: &str) -> bool {
        self.executors.read().await.contains_key(task_type)
    }

    pub async fn list_executors(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn count(&self) -> usize {
        self.executors.read().await.len()
    }

    /// 查找能处理指定任务类型的执行器
    pub async fn resolve(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        let registry = self.executors.read().await;
        if let Some(executor) = registry.get(task_type) {
            return Some(Arc::clone(executor));
        }

        let mut names: Vec<&String> = registry.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| registry.get(name))
            .find(|executor| executor.supports_task_type(task_type))
            .cloned()
    }
}

#[async_trait]
impl TaskExecutor for ExecutorRegistry {
    async fn execute(&self, context: ExecutionContext) -> SchedulerResult<serde_json::Value> {
        let executor = self.resolve(&context.task_type).await.ok_or_else(|| {
            SchedulerError::execution(format!(
                "没有可处理任务类型 {} 的执行器",
                context.task_type
            ))
        })?;
        executor.execute(context).await
    }

    fn name(&self) -> &str {
        "executor-registry"
    }

    fn supports_task_type(&self, task_type: &str) -> bool {
        match self.executors.try_read() {
            Ok(registry) => {
                registry.contains_key(task_type)
                    || registry.values().any(|e| e.supports_task_type(task_type))
            }
            Err(_) => true,
        }
    }
}
