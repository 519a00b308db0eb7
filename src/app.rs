use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Map};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use orchestrator_application::{AnalysisKind, AnalysisRequest, AnalysisStatus, OrchestrationEngine};
use orchestrator_config::AppConfig;
use orchestrator_core::models::{TaskId, TaskStatus};

const DEMO_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// 主应用程序
pub struct Application {
    engine: Arc<OrchestrationEngine>,
}

impl Application {
    pub fn new(config: AppConfig) -> Result<Self> {
        info!(
            "初始化应用程序: {} 个Worker, 启动加载 {:?}",
            config.registry.workers.len(),
            config.registry.autoload
        );
        let engine = OrchestrationEngine::build(config).context("构建编排引擎失败")?;
        Ok(Self::from_engine(engine))
    }

    pub fn from_engine(engine: OrchestrationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn engine(&self) -> &Arc<OrchestrationEngine> {
        &self.engine
    }

    /// 启动引擎并运行到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let (engine_shutdown, _) = broadcast::channel(16);
        let loaded = self.engine.start(&engine_shutdown).await;
        info!("应用程序已启动，已加载 {} 个Worker", loaded);

        let _ = shutdown_rx.recv().await;

        info!("停止编排引擎");
        let _ = engine_shutdown.send(());
        self.engine.shutdown().await;
        Ok(())
    }

    /// 提交一组示例分析，等待它们结束或超时
    pub async fn run_demo(&self, wait: Duration) -> Result<Vec<AnalysisStatus>> {
        let coordinator = self.engine.coordinator();
        let mut ids: Vec<TaskId> = Vec::new();

        ids.push(
            coordinator
                .submit_analysis(
                    AnalysisRequest::new(
                        AnalysisKind::DataAnalysis,
                        "Assess the drivers of trimmed mean CPI over the last four quarters",
                    )
                    .with_context_value("series", json!(["cpi_trimmed_mean", "wage_price_index"])),
                )
                .await?,
        );

        let mut data = Map::new();
        data.insert("cpi".to_string(), json!([3.8, 3.6, 3.5, 3.4]));
        data.insert("unemployment".to_string(), json!([3.9, 4.0, 4.1, 4.1]));
        data.insert("cash_rate".to_string(), json!([4.35, 4.35, 4.35, 4.1]));
        ids.push(coordinator.generate_hypothesis(data, None).await?);

        let mut indicators = Map::new();
        indicators.insert("cash_rate".to_string(), json!(4.1));
        indicators.insert("cpi".to_string(), json!(3.4));
        ids.push(
            coordinator
                .analyze_policy_impact(
                    "Lower the cash interest rate by 25 basis points",
                    indicators,
                    None,
                )
                .await?,
        );
        info!("已提交 {} 个示例分析", ids.len());

        let deadline = Instant::now() + wait;
        loop {
            let mut statuses = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(status) = coordinator.get_status(id).await {
                    statuses.push(status);
                }
            }
            let finished = statuses.len() == ids.len() && statuses.iter().all(is_settled);
            if finished {
                return Ok(statuses);
            }
            if Instant::now() >= deadline {
                warn!("示例分析等待超时 ({}s)", wait.as_secs());
                return Ok(statuses);
            }
            sleep(DEMO_POLL_INTERVAL).await;
        }
    }
}

/// 已归档结果或以失败结束
fn is_settled(status: &AnalysisStatus) -> bool {
    status.result.is_some()
        || matches!(
            status.status,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Cancelled
        )
}
