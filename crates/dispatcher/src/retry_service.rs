use std::time::Duration;

use engine_core::config::RetryConfig;

/// 重试退避策略
///
/// 第 `retry_count` 次失败后的等待时间为
/// `min(max_delay, base_delay × multiplier^retry_count)`。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 计算重试前的等待时间
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exponent = retry_count.min(i32::MAX as u32) as i32;

        // 计算指数退避间隔并限制最大间隔
        let capped = (base * self.config.backoff_multiplier.powi(exponent)).min(max);

        let delay_ms = if self.config.jitter_factor > 0.0 {
            // 添加随机抖动以避免雷群效应
            let jitter = capped * self.config.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
            (capped + jitter).clamp(base, max)
        } else {
            capped
        };

        Duration::from_millis(delay_ms.round() as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
