pub mod app_config;
pub mod engine;
pub mod observability;

pub use app_config::{AppConfig, DEFAULT_CONFIG_PATHS, ENV_PREFIX};
pub use engine::{EngineConfig, LoadBalancerConfig, RetryConfig, StatsConfig, SUPPORTED_STRATEGIES};
pub use observability::ObservabilityConfig;
