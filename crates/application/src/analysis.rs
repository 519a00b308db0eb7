//! 分析请求与结果

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use orchestrator_core::models::{
    TaskCallback, TaskId, TaskPriority, TaskStatus, TaskType, DEFAULT_TIMEOUT_SECONDS,
};
use orchestrator_core::time::Timestamp;
use orchestrator_core::OrchestratorError;
use orchestrator_dispatcher::{LoadBalancerStats, QueueStats};
use orchestrator_infrastructure::MemoryStats;
use orchestrator_worker::WorkerStatusReport;

/// 分析类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    HypothesisGeneration,
    DataAnalysis,
    Verification,
    PolicyAnalysis,
    Forecasting,
    ResearchSynthesis,
    ReportGeneration,
    AnomalyDetection,
    DataEnrichment,
    MonteCarloSimulation,
    CellularAutomata,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 11] = [
        AnalysisKind::HypothesisGeneration,
        AnalysisKind::DataAnalysis,
        AnalysisKind::Verification,
        AnalysisKind::PolicyAnalysis,
        AnalysisKind::Forecasting,
        AnalysisKind::ResearchSynthesis,
        AnalysisKind::ReportGeneration,
        AnalysisKind::AnomalyDetection,
        AnalysisKind::DataEnrichment,
        AnalysisKind::MonteCarloSimulation,
        AnalysisKind::CellularAutomata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::HypothesisGeneration => "hypothesis_generation",
            AnalysisKind::DataAnalysis => "data_analysis",
            AnalysisKind::Verification => "verification",
            AnalysisKind::PolicyAnalysis => "policy_analysis",
            AnalysisKind::Forecasting => "forecasting",
            AnalysisKind::ResearchSynthesis => "research_synthesis",
            AnalysisKind::ReportGeneration => "report_generation",
            AnalysisKind::AnomalyDetection => "anomaly_detection",
            AnalysisKind::DataEnrichment => "data_enrichment",
            AnalysisKind::MonteCarloSimulation => "monte_carlo_simulation",
            AnalysisKind::CellularAutomata => "cellular_automata",
        }
    }

    /// 对应的队列任务类型
    pub fn task_type(&self) -> TaskType {
        match self {
            AnalysisKind::HypothesisGeneration => TaskType::HypothesisGeneration,
            AnalysisKind::DataAnalysis => TaskType::DataAnalysis,
            AnalysisKind::Verification => TaskType::Verification,
            AnalysisKind::PolicyAnalysis => TaskType::PolicyAnalysis,
            AnalysisKind::Forecasting => TaskType::Forecasting,
            AnalysisKind::ResearchSynthesis => TaskType::ResearchSynthesis,
            AnalysisKind::ReportGeneration => TaskType::ReportGeneration,
            AnalysisKind::AnomalyDetection => TaskType::AnomalyDetection,
            AnalysisKind::DataEnrichment => TaskType::DataEnrichment,
            AnalysisKind::MonteCarloSimulation => TaskType::MonteCarlo,
            AnalysisKind::CellularAutomata => TaskType::CellularAutomata,
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| OrchestratorError::validation_error(format!("未知的分析类型: {s}")))
    }
}

/// 分析请求
#[derive(Clone)]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    pub content: String,
    pub context: Map<String, Value>,
    pub priority: TaskPriority,
    /// 只有第一个会作为首选Worker传给队列
    pub preferred_workers: Vec<String>,
    pub verification_required: bool,
    pub timeout_seconds: u64,
    pub callback: Option<TaskCallback>,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            context: Map::new(),
            priority: TaskPriority::Normal,
            preferred_workers: Vec::new(),
            verification_required: true,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            callback: None,
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_context_value(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preferred_worker(mut self, worker: impl Into<String>) -> Self {
        self.preferred_workers.push(worker.into());
        self
    }

    pub fn with_verification(mut self, required: bool) -> Self {
        self.verification_required = required;
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_callback(mut self, callback: TaskCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for AnalysisRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisRequest")
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("preferred_workers", &self.preferred_workers)
            .field("verification_required", &self.verification_required)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

/// 完成的分析
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub request_id: TaskId,
    pub kind: AnalysisKind,
    pub primary_result: Option<Value>,
    /// 未执行验证时为 `None`
    pub verification_results: Option<Vec<Value>>,
    pub confidence_score: f64,
    pub processing_time: f64,
    pub workers_used: Vec<String>,
    pub completed_at: Timestamp,
}

/// 分析状态查询结果
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisStatus {
    pub request_id: TaskId,
    pub status: TaskStatus,
    pub created_at: Option<Timestamp>,
    pub assigned_worker: Option<String>,
    pub retry_count: u32,
    pub processing_time: Option<f64>,
    pub error: Option<String>,
    pub result: Option<AnalysisResult>,
}

/// 协调器层面的累计指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceCounters {
    pub total_analyses: u64,
    pub successful_analyses: u64,
    pub failed_analyses: u64,
    pub average_processing_time: f64,
    pub verified_analyses: u64,
    pub verification_success_rate: f64,
}

impl PerformanceCounters {
    pub(crate) fn record_success(&mut self, processing_time: f64) {
        self.total_analyses += 1;
        self.successful_analyses += 1;
        let n = self.successful_analyses as f64;
        self.average_processing_time =
            (self.average_processing_time * (n - 1.0) + processing_time) / n;
    }

    pub(crate) fn record_failure(&mut self) {
        self.total_analyses += 1;
        self.failed_analyses += 1;
    }

    pub(crate) fn record_verification(&mut self, consensus_reached: bool) {
        self.verified_analyses += 1;
        let n = self.verified_analyses as f64;
        let hit = if consensus_reached { 1.0 } else { 0.0 };
        self.verification_success_rate = (self.verification_success_rate * (n - 1.0) + hit) / n;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSummary {
    pub active_analyses: usize,
    pub completed_analyses: usize,
    pub performance: PerformanceCounters,
}

/// 系统整体性能快照
#[derive(Debug, Clone, Serialize)]
pub struct SystemPerformance {
    pub coordinator: CoordinatorSummary,
    pub workers: Vec<WorkerStatusReport>,
    pub queue: QueueStats,
    pub load_balancer: LoadBalancerStats,
    pub memory: MemoryStats,
}

/// 健康检查告警
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthAlert {
    HighMemoryUsage { utilization: f64 },
    QueueBacklog { pending_tasks: usize },
    UnhealthyWorkers { workers: Vec<String> },
}

impl HealthAlert {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthAlert::HighMemoryUsage { .. } => "high_memory_usage",
            HealthAlert::QueueBacklog { .. } => "queue_backlog",
            HealthAlert::UnhealthyWorkers { .. } => "unhealthy_workers",
        }
    }
}

/// 验证结果中表示共识的比例，无结果时为 `None`
///
/// 结果为对象且 `"consensus": true` 时计为一票共识。
pub fn consensus_ratio(results: &[Value]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let agreeing = results
        .iter()
        .filter(|result| {
            result
                .get("consensus")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
        .count();
    Some(agreeing as f64 / results.len() as f64)
}

/// 根据验证结果计算置信度
pub fn consensus_confidence(results: &[Value], threshold: f64, empty_confidence: f64) -> f64 {
    match consensus_ratio(results) {
        None => empty_confidence,
        Some(ratio) if ratio >= threshold => (0.7 + 0.3 * ratio).min(1.0),
        Some(ratio) => (0.7 * ratio).max(0.1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_maps_to_task_type() {
        assert_eq!(
            AnalysisKind::MonteCarloSimulation.task_type(),
            TaskType::MonteCarlo
        );
        assert_eq!(
            "monte_carlo_simulation".parse::<AnalysisKind>().unwrap(),
            AnalysisKind::MonteCarloSimulation
        );
        assert!("monte_carlo".parse::<AnalysisKind>().is_err());
        for kind in AnalysisKind::ALL {
            assert_eq!(kind.as_str().parse::<AnalysisKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_consensus_confidence() {
        let agree = json!({"consensus": true});
        let disagree = json!({"consensus": false});

        assert_eq!(consensus_confidence(&[], 0.7, 0.5), 0.5);
        assert!((consensus_confidence(&[agree.clone()], 0.7, 0.5) - 1.0).abs() < 1e-9);

        // 3/4 = 0.75 ≥ 0.7
        let mostly = vec![agree.clone(), agree.clone(), agree.clone(), disagree.clone()];
        assert!((consensus_confidence(&mostly, 0.7, 0.5) - 0.925).abs() < 1e-9);

        // 1/2 < 0.7
        let split = vec![agree, disagree.clone()];
        assert!((consensus_confidence(&split, 0.7, 0.5) - 0.35).abs() < 1e-9);

        // 非对象结果不计入共识
        let none = vec![disagree, json!("looks fine")];
        assert!((consensus_confidence(&none, 0.7, 0.5) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_running_averages() {
        let mut counters = PerformanceCounters::default();
        counters.record_success(2.0);
        counters.record_success(4.0);
        counters.record_failure();
        assert_eq!(counters.total_analyses, 3);
        assert_eq!(counters.failed_analyses, 1);
        assert!((counters.average_processing_time - 3.0).abs() < 1e-9);

        counters.record_verification(true);
        counters.record_verification(false);
        assert!((counters.verification_success_rate - 0.5).abs() < 1e-9);
    }
}
