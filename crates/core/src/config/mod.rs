//! 配置管理
//!
//! 配置按节组织（`engine`、`retry`、`load_balancer`、`stats`、`observability`），
//! 每个字段都有默认值，配置文件只需写出要覆盖的部分。
//!
//! 加载顺序：内置默认值 → TOML配置文件 → `ENGINE__` 前缀的环境变量。
//!
//! ```rust,no_run
//! use engine_core::config::AppConfig;
//!
//! let config = AppConfig::load(Some("config/engine.toml")).expect("加载配置失败");
//! println!("初始Worker数: {}", config.engine.initial_workers);
//! ```

pub mod models;

pub use models::*;
