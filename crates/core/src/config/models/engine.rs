use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 支持的负载均衡策略名
pub const SUPPORTED_STRATEGIES: [&str; 5] = [
    "round_robin",
    "least_loaded",
    "weighted_random",
    "performance_based",
    "adaptive",
];

/// 引擎调度配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    /// 每个Worker可同时执行的任务数，也是 WeightedRandom 使用的权重
    pub worker_capacity: u32,
    /// 0 表示不限制
    pub max_queue_size: usize,
    pub default_max_retries: u32,
    pub task_timeout_seconds: u64,
    pub cancel_grace_period_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub failure_check_interval_ms: u64,
    pub replace_crashed_workers: bool,
    pub shutdown_timeout_seconds: u64,
    /// 队列效率的目标等待时间
    pub target_wait_ms: u64,
    pub worker_stats_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            min_workers: 0,
            max_workers: 64,
            worker_capacity: 1,
            max_queue_size: 10_000,
            default_max_retries: 3,
            task_timeout_seconds: 300,
            cancel_grace_period_ms: 5_000,
            heartbeat_interval_ms: 1_000,
            heartbeat_timeout_ms: 15_000,
            failure_check_interval_ms: 1_000,
            replace_crashed_workers: true,
            shutdown_timeout_seconds: 30,
            target_wait_ms: 5_000,
            worker_stats_window: 20,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_workers == 0 {
            return Err(anyhow::anyhow!("最大Worker数必须大于0"));
        }

        if self.min_workers > self.max_workers {
            return Err(anyhow::anyhow!(
                "最小Worker数 {} 不能大于最大Worker数 {}",
                self.min_workers,
                self.max_workers
            ));
        }

        if self.initial_workers < self.min_workers || self.initial_workers > self.max_workers {
            return Err(anyhow::anyhow!(
                "初始Worker数 {} 超出范围 [{}, {}]",
                self.initial_workers,
                self.min_workers,
                self.max_workers
            ));
        }

        if self.worker_capacity == 0 {
            return Err(anyhow::anyhow!("Worker容量必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.heartbeat_interval_ms == 0 || self.failure_check_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔和故障检测间隔必须大于0"));
        }

        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(anyhow::anyhow!(
                "心跳超时 {}ms 必须大于心跳间隔 {}ms",
                self.heartbeat_timeout_ms,
                self.heartbeat_interval_ms
            ));
        }

        if self.worker_stats_window == 0 {
            return Err(anyhow::anyhow!("Worker统计窗口必须大于0"));
        }

        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn cancel_grace_period(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_period_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn failure_check_interval(&self) -> Duration {
        Duration::from_millis(self.failure_check_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn target_wait(&self) -> Duration {
        Duration::from_millis(self.target_wait_ms)
    }
}

/// 重试退避配置
///
/// 第 r 次重试前的等待时间为 `min(max_delay, base_delay × multiplier^r)`，
/// `jitter_factor` 大于 0 时在此基础上加入随机抖动。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_delay_ms < self.base_delay_ms {
            return Err(anyhow::anyhow!(
                "最大重试延迟 {}ms 不能小于基础延迟 {}ms",
                self.max_delay_ms,
                self.base_delay_ms
            ));
        }

        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数必须不小于1.0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动因子必须在 [0, 1] 之间"));
        }

        Ok(())
    }
}

/// 负载均衡配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: String,
    pub adaptive_success_threshold: f64,
    /// 自适应策略的滑动窗口大小，同时也是回退期的选择次数
    pub adaptive_window: usize,
    pub adaptive_min_samples: usize,
    pub weighted_random_seed: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: "round_robin".to_string(),
            adaptive_success_threshold: 0.8,
            adaptive_window: 20,
            adaptive_min_samples: 5,
            weighted_random_seed: 42,
        }
    }
}

impl LoadBalancerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !SUPPORTED_STRATEGIES.contains(&self.strategy.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的负载均衡策略: {}，支持的策略: {:?}",
                self.strategy,
                SUPPORTED_STRATEGIES
            ));
        }

        if !(0.0..=1.0).contains(&self.adaptive_success_threshold) {
            return Err(anyhow::anyhow!("自适应成功率阈值必须在 [0, 1] 之间"));
        }

        if self.adaptive_window == 0 {
            return Err(anyhow::anyhow!("自适应窗口必须大于0"));
        }

        if self.adaptive_min_samples > self.adaptive_window {
            return Err(anyhow::anyhow!("自适应最小样本数不能大于窗口大小"));
        }

        Ok(())
    }
}

/// 统计配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    pub throughput_window_seconds: u64,
    /// 平均处理时间的指数移动平均系数
    pub ema_alpha: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            throughput_window_seconds: 60,
            ema_alpha: 0.2,
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.throughput_window_seconds == 0 {
            return Err(anyhow::anyhow!("吞吐量窗口必须大于0"));
        }

        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(anyhow::anyhow!("EMA系数必须在 (0, 1] 之间"));
        }

        Ok(())
    }

    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_seconds)
    }
}
