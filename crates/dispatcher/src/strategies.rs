use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use engine_core::{
    config::LoadBalancerConfig,
    models::{StrategyInfo, StrategySwitch, TaskRecord, WorkerHandle},
    traits::TaskDispatchStrategy,
    SchedulerError, SchedulerResult,
};

pub const ROUND_ROBIN: &str = "round_robin";
pub const LEAST_LOADED: &str = "least_loaded";
pub const WEIGHTED_RANDOM: &str = "weighted_random";
pub const PERFORMANCE_BASED: &str = "performance_based";
pub const ADAPTIVE: &str = "adaptive";

/// 在候选中按注册顺序找到上次选择之后的第一个Worker，找不到时回到开头
fn next_after<'a>(candidates: &[&'a WorkerHandle], last_seq: Option<u64>) -> Option<&'a WorkerHandle> {
    let mut ordered: Vec<&WorkerHandle> = candidates.to_vec();
    ordered.sort_by_key(|w| w.seq);
    match last_seq {
        Some(last) => ordered
            .iter()
            .find(|w| w.seq > last)
            .or_else(|| ordered.first())
            .copied(),
        None => ordered.first().copied(),
    }
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// 轮询策略：按注册顺序循环选择可用Worker
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    last_seq: Option<u64>,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskDispatchStrategy for RoundRobinStrategy {
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        let selected = next_after(available_workers, self.last_seq)?;
        self.last_seq = Some(selected.seq);

        debug!(
            "轮询策略为任务 {} 选择Worker: {} (候选数: {})",
            task.id,
            selected.id,
            available_workers.len()
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        ROUND_ROBIN
    }
}

/// 最小负载策略：选择滚动平均延迟最低的可用Worker，相同延迟时轮询
#[derive(Debug, Default)]
pub struct LeastLoadedStrategy {
    last_seq: Option<u64>,
}

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskDispatchStrategy for LeastLoadedStrategy {
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        let lowest = available_workers
            .iter()
            .map(|w| w.stats.avg_latency_ms())
            .min_by(|a, b| cmp_f64(*a, *b))?;

        let tied: Vec<&WorkerHandle> = available_workers
            .iter()
            .filter(|w| w.stats.avg_latency_ms() == lowest)
            .copied()
            .collect();
        let selected = next_after(&tied, self.last_seq)?;
        self.last_seq = Some(selected.seq);

        debug!(
            "最小负载策略为任务 {} 选择Worker: {} (平均延迟: {:.1}ms)",
            task.id, selected.id, lowest
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        LEAST_LOADED
    }
}

/// 加权随机策略：按Worker声明的容量加权随机选择
///
/// 随机数生成器使用固定种子，相同输入序列得到相同选择序列。
#[derive(Debug)]
pub struct WeightedRandomStrategy {
    rng: StdRng,
}

impl WeightedRandomStrategy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl TaskDispatchStrategy for WeightedRandomStrategy {
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        let mut ordered: Vec<&WorkerHandle> = available_workers.to_vec();
        ordered.sort_by_key(|w| w.seq);

        let total: u64 = ordered.iter().map(|w| u64::from(w.capacity.max(1))).sum();
        if total == 0 {
            return None;
        }

        let mut roll = self.rng.random_range(0..total);
        let selected = ordered.iter().find(|w| {
            let weight = u64::from(w.capacity.max(1));
            if roll < weight {
                true
            } else {
                roll -= weight;
                false
            }
        })?;

        debug!(
            "加权随机策略为任务 {} 选择Worker: {} (权重: {}/{})",
            task.id, selected.id, selected.capacity, total
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        WEIGHTED_RANDOM
    }
}

/// 性能优先策略：成功率最高者优先，其次平均延迟最低，再次注册最早
#[derive(Debug, Default)]
pub struct PerformanceBasedStrategy;

impl PerformanceBasedStrategy {
    pub fn new() -> Self {
        Self
    }

    fn best<'a>(available_workers: &[&'a WorkerHandle]) -> Option<&'a WorkerHandle> {
        available_workers.iter().copied().min_by(|a, b| {
            cmp_f64(b.stats.success_rate(), a.stats.success_rate())
                .then_with(|| cmp_f64(a.stats.avg_latency_ms(), b.stats.avg_latency_ms()))
                .then_with(|| a.seq.cmp(&b.seq))
        })
    }
}

impl TaskDispatchStrategy for PerformanceBasedStrategy {
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        let selected = Self::best(available_workers)?;
        debug!(
            "性能优先策略为任务 {} 选择Worker: {} (成功率: {:.2})",
            task.id,
            selected.id,
            selected.stats.success_rate()
        );
        Some(selected.id.clone())
    }

    fn name(&self) -> &str {
        PERFORMANCE_BASED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdaptiveMode {
    Performance,
    /// 剩余的回退选择次数
    Fallback { remaining: usize },
}

/// 自适应策略
///
/// 默认按性能优先选择；若被选中Worker在滑动窗口内的成功率低于阈值，
/// 接下来 `window` 次选择回退为最小负载策略，之后重新评估。
/// 滑动窗口计数由策略实例独占持有。
#[derive(Debug)]
pub struct AdaptiveStrategy {
    threshold: f64,
    window: usize,
    min_samples: usize,
    mode: AdaptiveMode,
    outcomes: HashMap<String, VecDeque<bool>>,
    performance: PerformanceBasedStrategy,
    least_loaded: LeastLoadedStrategy,
    switches: Vec<StrategySwitch>,
}

impl AdaptiveStrategy {
    pub fn new(threshold: f64, window: usize, min_samples: usize) -> Self {
        Self {
            threshold,
            window: window.max(1),
            min_samples,
            mode: AdaptiveMode::Performance,
            outcomes: HashMap::new(),
            performance: PerformanceBasedStrategy::new(),
            least_loaded: LeastLoadedStrategy::new(),
            switches: Vec::new(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.mode, AdaptiveMode::Fallback { .. })
    }

    /// 滑动窗口内的成功率，样本不足时返回 `None`
    pub fn window_success_rate(&self, worker_id: &str) -> Option<f64> {
        let outcomes = self.outcomes.get(worker_id)?;
        if outcomes.is_empty() || outcomes.len() < self.min_samples {
            return None;
        }
        let successes = outcomes.iter().filter(|ok| **ok).count();
        Some(successes as f64 / outcomes.len() as f64)
    }

    fn switch(&mut self, to: AdaptiveMode, worker_id: Option<&str>, success_rate: Option<f64>) {
        let from = self.effective_strategy().to_string();
        self.mode = to;
        let to_name = self.effective_strategy().to_string();
        self.switches.push(StrategySwitch {
            from,
            to: to_name,
            worker_id: worker_id.map(str::to_string),
            success_rate,
            at: Utc::now(),
        });
    }
}

impl TaskDispatchStrategy for AdaptiveStrategy {
    fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        if available_workers.is_empty() {
            return None;
        }

        if let AdaptiveMode::Fallback { remaining } = self.mode {
            if remaining == 0 {
                self.switch(AdaptiveMode::Performance, None, None);
            } else {
                self.mode = AdaptiveMode::Fallback {
                    remaining: remaining - 1,
                };
                return self.least_loaded.select_worker(task, available_workers);
            }
        }

        let chosen = self.performance.select_worker(task, available_workers)?;
        match self.window_success_rate(&chosen) {
            Some(rate) if rate < self.threshold => {
                self.switch(
                    AdaptiveMode::Fallback {
                        remaining: self.window - 1,
                    },
                    Some(&chosen),
                    Some(rate),
                );
                self.least_loaded.select_worker(task, available_workers)
            }
            _ => Some(chosen),
        }
    }

    fn name(&self) -> &str {
        ADAPTIVE
    }

    fn effective_strategy(&self) -> &str {
        match self.mode {
            AdaptiveMode::Performance => PERFORMANCE_BASED,
            AdaptiveMode::Fallback { .. } => LEAST_LOADED,
        }
    }

    fn record_outcome(&mut self, worker_id: &str, success: bool, _latency: Duration) {
        let window = self.window;
        let outcomes = self.outcomes.entry(worker_id.to_string()).or_default();
        if outcomes.len() == window {
            outcomes.pop_front();
        }
        outcomes.push_back(success);
    }

    fn drain_switches(&mut self) -> Vec<StrategySwitch> {
        std::mem::take(&mut self.switches)
    }
}

/// 按名称创建策略，名称不区分大小写，`-` 与 `_` 等价
pub fn create_strategy(
    name: &str,
    config: &LoadBalancerConfig,
) -> SchedulerResult<Box<dyn TaskDispatchStrategy>> {
    let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
    let strategy: Box<dyn TaskDispatchStrategy> = match normalized.as_str() {
        ROUND_ROBIN => Box::new(RoundRobinStrategy::new()),
        LEAST_LOADED => Box::new(LeastLoadedStrategy::new()),
        WEIGHTED_RANDOM => Box::new(WeightedRandomStrategy::new(config.weighted_random_seed)),
        PERFORMANCE_BASED => Box::new(PerformanceBasedStrategy::new()),
        ADAPTIVE => Box::new(AdaptiveStrategy::new(
            config.adaptive_success_threshold,
            config.adaptive_window,
            config.adaptive_min_samples,
        )),
        _ => {
            return Err(SchedulerError::UnknownStrategy {
                name: name.to_string(),
            })
        }
    };
    Ok(strategy)
}

/// 负载均衡器
///
/// 持有当前策略实例，运行时切换策略只替换这一个引用。
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    strategy: Box<dyn TaskDispatchStrategy>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig) -> SchedulerResult<Self> {
        let strategy = create_strategy(&config.strategy, &config)?;
        Ok(Self { config, strategy })
    }

    pub fn select_worker(
        &mut self,
        task: &TaskRecord,
        available_workers: &[&WorkerHandle],
    ) -> Option<String> {
        if available_workers.is_empty() {
            debug!("没有可用的Worker");
            return None;
        }
        self.strategy.select_worker(task, available_workers)
    }

    /// 切换策略，返回之前的策略名
    pub fn set_strategy(&mut self, name: &str) -> SchedulerResult<String> {
        let strategy = create_strategy(name, &self.config)?;
        let previous = self.strategy.name().to_string();
        self.strategy = strategy;
        Ok(previous)
    }

    pub fn info(&self) -> StrategyInfo {
        StrategyInfo {
            name: self.strategy.name().to_string(),
            effective: self.strategy.effective_strategy().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        self.strategy.name()
    }

    pub fn record_outcome(&mut self, worker_id: &str, success: bool, latency: Duration) {
        self.strategy.record_outcome(worker_id, success, latency);
    }

    pub fn drain_switches(&mut self) -> Vec<StrategySwitch> {
        self.strategy.drain_switches()
    }
}
