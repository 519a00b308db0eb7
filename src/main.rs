use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use orchestrator_config::{AppConfig, ObservabilityConfig};
use orchestrator_core::{init_logging, LogFormat};
use tokio::signal;
use tracing::{error, info, warn};

use orchestrator::app::Application;
use orchestrator::shutdown::ShutdownManager;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEMO_WAIT: Duration = Duration::from_secs(120);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("资源感知的推理Worker编排引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时查找 config/orchestrator.toml"),
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
            Arg::new("demo")
                .long("demo")
                .help("提交一组示例分析，输出结果后退出")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    let log_format: LogFormat = config.observability.log_format.parse()?;
    init_logging(&config.observability.log_level, log_format)?;
    info!("启动推理Worker编排引擎");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }
    if config.observability.metrics_enabled {
        init_metrics(&config.observability)?;
    }

    let app = Arc::new(Application::new(config)?);
    let shutdown_manager = ShutdownManager::new();

    let handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    if matches.get_flag("demo") {
        let statuses = app.run_demo(DEMO_WAIT).await?;
        for status in &statuses {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        let performance = app.engine().coordinator().get_performance_snapshot().await;
        println!("{}", serde_json::to_string_pretty(&performance.coordinator)?);
    } else {
        wait_for_shutdown_signal().await;
        info!("收到关闭信号，开始优雅关闭...");
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("推理Worker编排引擎已退出");
    Ok(())
}

/// 安装Prometheus指标导出器
fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let address: SocketAddr = config
        .metrics_listen_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_listen_address))?;
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus导出器失败: {}", e))?;
    info!("Prometheus指标导出器已启动: {address}");
    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
