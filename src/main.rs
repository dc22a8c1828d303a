use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use analysis_engine::{
    app::{AppOptions, Application},
    executors::simulated_registry,
    shutdown::ShutdownManager,
};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use engine_core::{init_logging, AppConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let matches = Command::new("analysis-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分析任务处理与负载均衡引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（缺省时搜索 config/engine.toml 和 engine.toml）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .help("启用Prometheus指标导出")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("retention")
                .long("retention")
                .value_name("SECONDS")
                .help("已结束任务的保留时长")
                .value_parser(clap::value_parser!(u64))
                .default_value("3600"),
        )
        .arg(
            Arg::new("report-interval")
                .long("report-interval")
                .value_name("SECONDS")
                .help("统计输出与清理周期")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("30"),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .value_name("DOCUMENTS")
                .help("启动后为指定数量的文档提交演示分析任务")
                .value_parser(clap::value_parser!(usize)),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config");

    // 加载配置
    let mut config = AppConfig::load(config_path.map(String::as_str)).with_context(|| {
        format!(
            "加载配置失败: {}",
            config_path.map(String::as_str).unwrap_or("<默认路径>")
        )
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }
    if matches.get_flag("metrics") {
        config.observability.metrics_enabled = true;
    }

    // 初始化日志系统
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动分析任务处理引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        install_metrics_exporter(&config.observability.metrics_listen_address)?;
    }

    let options = AppOptions {
        retention: Duration::from_secs(*matches.get_one::<u64>("retention").unwrap_or(&3600)),
        report_interval: Duration::from_secs(
            *matches.get_one::<u64>("report-interval").unwrap_or(&30),
        ),
    };
    let shutdown_grace = config.engine.shutdown_timeout() + Duration::from_secs(5);

    let registry = simulated_registry(Duration::from_millis(200), 5).await;
    let app = Arc::new(Application::new(config, Arc::new(registry), options));
    app.start().await?;

    if let Some(documents) = matches.get_one::<usize>("demo") {
        app.submit_demo_workload(*documents).await?;
    }

    // 创建优雅关闭管理器
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);

        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    // 等待关闭信号
    wait_for_shutdown_signal().await?;

    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // 引擎自身的关闭超时之外再留一点余量
    match tokio::time::timeout(shutdown_grace, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分析任务处理引擎已退出");
    Ok(())
}

/// 在指定地址上启动Prometheus抓取端点
fn install_metrics_exporter(listen_address: &str) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen_address}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("安装Prometheus指标导出器失败")?;

    info!("Prometheus指标导出已启用: http://{addr}/metrics");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() -> Result<()> {
    let ctrl_c = async { signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败") };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("收到Ctrl+C信号");
        },
        result = terminate => {
            result?;
            info!("收到SIGTERM信号");
        },
    }

    Ok(())
}
