use std::time::Duration;

use crate::models::{StrategySwitch, TaskRecord, WorkerHandle};

/// 任务分派策略接口
///
/// 策略实例由调度循环独占持有，所有方法都在单一协调上下文中调用，
/// 因此内部状态（轮询游标、滑动窗口等）无需加锁。
pub trait TaskDispatchStrategy: Send {
    /// 从仍有空闲槽位的Worker中选择一个执行任务，无可用Worker时返回 `None`
    ///
    /// `available_workers` 按注册顺序排列。
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String>;

    /// 获取策略名称
    fn name(&self) -> &str;

    /// 当前实际生效的策略名称
    fn effective_strategy(&self) -> &str {
        self.name()
    }

    /// 记录一次执行结果
    fn record_outcome(&mut self, _worker_id: &str, _success: bool, _latency: Duration) {}

    /// 取出自上次调用以来发生的策略切换
    fn drain_switches(&mut self) -> Vec<StrategySwitch> {
        Vec::new()
    }
}
