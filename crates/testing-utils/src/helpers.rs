//! Test helper utilities and common testing patterns

use std::time::Duration;

use orchestrator_config::AppConfig;
use orchestrator_core::models::BackendKind;
use tokio::time::sleep;

/// 初始化测试日志，可重复调用
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// 适合测试的配置：默认Worker目录，零延迟模拟后端，关闭系统内存探测，缩短后台循环间隔
pub fn test_app_config() -> AppConfig {
    let mut config = AppConfig::default();
    for worker in &mut config.registry.workers {
        worker.backend = BackendKind::Simulated {
            latency_ms: 0,
            failure_rate: 0.0,
        };
    }
    config.memory.use_system_probe = false;
    config.dispatcher.dispatch_interval_ms = 10;
    config.coordinator.reconcile_interval_seconds = 1;
    config.coordinator.verification_poll_interval_ms = 20;
    config.coordinator.verification_wait_seconds = 5;
    config.observability.metrics_enabled = false;
    config
}

/// Test environment setup utilities
pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }
}
