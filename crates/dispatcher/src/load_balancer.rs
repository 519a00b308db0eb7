//! Worker选择与性能记录
//!
//! 负载均衡器从 [`WorkerDirectory`] 读取Worker快照，通过可配置的 [`SelectionStrategy`]
//! 选出最合适的Worker，并维护每个Worker的滚动指标和按任务类型的历史耗时。
//! 并发槽位的预留由目录在自身锁内完成，负载均衡器只在本地锁释放后调用目录。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use orchestrator_config::LoadBalancerConfig;
use orchestrator_core::models::{CapabilityMatrix, TaskPriority, TaskType, WorkerSnapshot};
use orchestrator_core::time::SharedTimeProvider;
use orchestrator_core::{spawn_periodic, WorkerDirectory};

use crate::metrics::{PerformanceHistory, PerformanceSummary, Sample, WorkerMetrics};
use crate::strategies::{build_strategy, Candidate, SelectionContext, SelectionStrategy};

const FAST_PATH_CONFIDENCE: f64 = 0.9;
const DEFAULT_WAIT_ESTIMATE: f64 = 30.0;
const DEFAULT_PROCESSING_ESTIMATE: f64 = 60.0;
const MIN_SAMPLES_FOR_ESTIMATE: usize = 3;
const THROUGHPUT_WINDOW_SECONDS: f64 = 300.0;

/// 选择结果
#[derive(Debug, Clone, Serialize)]
pub struct SelectionDecision {
    pub worker: String,
    pub confidence: f64,
    pub reasoning: String,
    pub alternatives: Vec<String>,
    pub estimated_wait_time: f64,
    pub estimated_processing_time: f64,
    pub strategy: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemLoad {
    pub utilization_ratio: f64,
    pub average_response_time: f64,
    pub total_active_requests: u32,
    pub total_capacity: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub strategy: String,
    pub total_workers: usize,
    pub worker_metrics: BTreeMap<String, WorkerMetrics>,
    pub task_performance: Vec<PerformanceSummary>,
    pub system_load: SystemLoad,
}

pub struct LoadBalancer {
    config: LoadBalancerConfig,
    directory: Arc<dyn WorkerDirectory>,
    capabilities: CapabilityMatrix,
    strategy: Box<dyn SelectionStrategy>,
    metrics: RwLock<HashMap<String, WorkerMetrics>>,
    history: RwLock<PerformanceHistory>,
    time: SharedTimeProvider,
}

impl LoadBalancer {
    pub fn new(
        config: LoadBalancerConfig,
        directory: Arc<dyn WorkerDirectory>,
        capabilities: CapabilityMatrix,
        time: SharedTimeProvider,
    ) -> Self {
        let strategy = build_strategy(config.strategy);
        Self::with_strategy(config, directory, capabilities, time, strategy)
    }

    pub fn with_strategy(
        config: LoadBalancerConfig,
        directory: Arc<dyn WorkerDirectory>,
        capabilities: CapabilityMatrix,
        time: SharedTimeProvider,
        strategy: Box<dyn SelectionStrategy>,
    ) -> Self {
        info!("LoadBalancer initialized with strategy: {}", strategy.name());
        let history = PerformanceHistory::new(config.history_length);
        Self {
            config,
            directory,
            capabilities,
            strategy,
            metrics: RwLock::new(HashMap::new()),
            history: RwLock::new(history),
            time,
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    /// 选择Worker
    ///
    /// 首选Worker可用时直接返回（快速路径），不参与评分。
    pub async fn select(
        &self,
        task_type: TaskType,
        priority: TaskPriority,
        preferred_worker: Option<&str>,
        context: Option<&Map<String, Value>>,
    ) -> Option<SelectionDecision> {
        let snapshot = self.directory.snapshot().await;
        let eligible: Vec<&WorkerSnapshot> = snapshot
            .iter()
            .filter(|worker| worker.is_eligible() && worker.supports(task_type))
            .collect();

        if eligible.is_empty() {
            debug!("没有可处理任务类型 {} 的可用Worker", task_type);
            counter!("orchestrator_selection_unavailable_total").increment(1);
            return None;
        }

        let metrics = self.metrics.read().await;
        let history = self.history.read().await;

        if let Some(preferred) = preferred_worker {
            if let Some(worker) = eligible.iter().find(|worker| worker.name == preferred) {
                counter!("orchestrator_selection_total", "strategy" => "preferred").increment(1);
                return Some(SelectionDecision {
                    worker: worker.name.clone(),
                    confidence: FAST_PATH_CONFIDENCE,
                    reasoning: "Preferred worker specified and available".to_string(),
                    alternatives: Vec::new(),
                    estimated_wait_time: 0.0,
                    estimated_processing_time: self.estimate_processing(
                        &metrics,
                        &history,
                        &worker.name,
                        task_type,
                    ),
                    strategy: "preferred".to_string(),
                });
            }
        }

        let ctx = SelectionContext {
            task_type,
            priority,
            candidates: eligible
                .iter()
                .map(|&worker| Candidate {
                    worker,
                    metrics: metrics.get(&worker.name),
                    capability: self.capabilities.score(&worker.name, task_type),
                    median_latency: history.median(
                        task_type,
                        &worker.name,
                        self.config.min_requests_for_stats,
                    ),
                })
                .collect(),
            weights: &self.config.weights,
            response_time_ceiling: self.config.response_time_ceiling_seconds,
        };

        let choice = self.strategy.select(&ctx)?;
        let selected = ctx.candidates.get(choice.index)?.worker;
        let alternatives = choice
            .alternatives
            .iter()
            .filter_map(|index| ctx.candidates.get(*index))
            .take(self.config.max_alternatives)
            .map(|candidate| candidate.name().to_string())
            .collect();

        let decision = SelectionDecision {
            worker: selected.name.clone(),
            confidence: choice.confidence,
            reasoning: choice.reasoning,
            alternatives,
            estimated_wait_time: Self::estimate_wait(&metrics, selected),
            estimated_processing_time: self.estimate_processing(
                &metrics,
                &history,
                &selected.name,
                task_type,
            ),
            strategy: self.strategy.name().to_string(),
        };

        counter!("orchestrator_selection_total", "strategy" => self.strategy.name().to_string())
            .increment(1);
        debug!(
            worker = %decision.worker,
            task_type = %task_type,
            confidence = decision.confidence,
            context_keys = context.map_or(0, Map::len),
            "{}",
            decision.reasoning
        );
        Some(decision)
    }

    fn estimate_wait(metrics: &HashMap<String, WorkerMetrics>, worker: &WorkerSnapshot) -> f64 {
        match metrics.get(&worker.name) {
            Some(metrics) => (worker.current_requests as f64 * metrics.average_response_time).max(0.0),
            None => DEFAULT_WAIT_ESTIMATE,
        }
    }

    fn estimate_processing(
        &self,
        metrics: &HashMap<String, WorkerMetrics>,
        history: &PerformanceHistory,
        worker: &str,
        task_type: TaskType,
    ) -> f64 {
        if let Some(median) = history.median(task_type, worker, MIN_SAMPLES_FOR_ESTIMATE) {
            return median;
        }
        match metrics.get(worker) {
            Some(metrics) if metrics.average_response_time > 0.0 => metrics.average_response_time,
            _ => DEFAULT_PROCESSING_ESTIMATE,
        }
    }

    /// 派发时预留槽位，目录拒绝时返回 false
    pub async fn record_assignment(&self, worker: &str) -> bool {
        if !self.directory.acquire(worker).await {
            debug!("Worker {} 无法预留槽位", worker);
            return false;
        }
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .entry(worker.to_string())
            .or_insert_with(|| WorkerMetrics::new(worker, self.config.response_time_window));
        entry.current_load += 1;
        gauge!("orchestrator_worker_load", "worker" => worker.to_string())
            .set(entry.current_load as f64);
        true
    }

    /// 归还未被使用的预留槽位
    pub async fn release_assignment(&self, worker: &str) {
        {
            let mut metrics = self.metrics.write().await;
            if let Some(entry) = metrics.get_mut(worker) {
                entry.current_load = entry.current_load.saturating_sub(1);
            }
        }
        self.directory.cancel_reservation(worker).await;
    }

    /// 记录任务结果并归还槽位
    pub async fn record_outcome(
        &self,
        worker: &str,
        task_type: TaskType,
        response_time: f64,
        success: bool,
    ) {
        let now = self.time.now();
        {
            let mut metrics = self.metrics.write().await;
            let entry = metrics
                .entry(worker.to_string())
                .or_insert_with(|| WorkerMetrics::new(worker, self.config.response_time_window));
            entry.record(response_time, success, now, THROUGHPUT_WINDOW_SECONDS);
            gauge!("orchestrator_worker_load", "worker" => worker.to_string())
                .set(entry.current_load as f64);
        }
        {
            let mut history = self.history.write().await;
            let sample = if success {
                Sample::Success(response_time)
            } else {
                Sample::Failure
            };
            history.record(task_type, worker, sample);
        }

        histogram!("orchestrator_worker_response_seconds", "worker" => worker.to_string())
            .record(response_time);
        if !success {
            counter!("orchestrator_worker_failures_total", "worker" => worker.to_string())
                .increment(1);
        }
        self.directory.release(worker, response_time, success).await;
    }

    /// 从目录同步健康评分与负载
    pub async fn refresh_metrics(&self) {
        let snapshot = self.directory.snapshot().await;
        let now = self.time.now();
        let mut metrics = self.metrics.write().await;
        for worker in &snapshot {
            let entry = metrics
                .entry(worker.name.clone())
                .or_insert_with(|| WorkerMetrics::new(&worker.name, self.config.response_time_window));
            entry.health_score = worker.health_score;
            entry.current_load = worker.current_requests;
            entry.refresh_throughput(now, THROUGHPUT_WINDOW_SECONDS);
        }
    }

    pub async fn worker_metrics(&self, worker: &str) -> Option<WorkerMetrics> {
        self.metrics.read().await.get(worker).cloned()
    }

    pub async fn stats(&self) -> LoadBalancerStats {
        let snapshot = self.directory.snapshot().await;
        let total_active_requests: u32 = snapshot.iter().map(|w| w.current_requests).sum();
        let total_capacity: u32 = snapshot.iter().map(|w| w.capacity).sum();

        let metrics = self.metrics.read().await;
        let response_times: Vec<f64> = metrics
            .values()
            .map(|m| m.average_response_time)
            .filter(|time| *time > 0.0)
            .collect();
        let average_response_time = if response_times.is_empty() {
            0.0
        } else {
            response_times.iter().sum::<f64>() / response_times.len() as f64
        };

        let task_performance = self
            .history
            .read()
            .await
            .summaries(self.config.min_requests_for_stats);

        LoadBalancerStats {
            strategy: self.strategy.name().to_string(),
            total_workers: metrics.len(),
            worker_metrics: metrics
                .iter()
                .map(|(name, m)| (name.clone(), m.clone()))
                .collect(),
            task_performance,
            system_load: SystemLoad {
                utilization_ratio: if total_capacity > 0 {
                    total_active_requests as f64 / total_capacity as f64
                } else {
                    0.0
                },
                average_response_time,
                total_active_requests,
                total_capacity,
            },
        }
    }

    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let balancer = Arc::clone(self);
        let refresh = spawn_periodic(
            "load_balancer_refresh",
            Duration::from_secs(self.config.metrics_refresh_interval_seconds),
            shutdown.subscribe(),
            move || {
                let balancer = Arc::clone(&balancer);
                async move {
                    balancer.refresh_metrics().await;
                }
            },
        );
        vec![refresh]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use orchestrator_config::LoadBalancingStrategy;
    use orchestrator_core::models::{WorkerPriority, WorkerStatus};
    use orchestrator_core::ManualTimeProvider;

    mock! {
        pub Directory {}

        #[async_trait]
        impl WorkerDirectory for Directory {
            async fn snapshot(&self) -> Vec<WorkerSnapshot>;
            async fn acquire(&self, name: &str) -> bool;
            async fn release(&self, name: &str, response_time: f64, success: bool);
            async fn cancel_reservation(&self, name: &str);
        }
    }

    fn worker(name: &str, status: WorkerStatus, current: u32, capacity: u32) -> WorkerSnapshot {
        WorkerSnapshot {
            name: name.to_string(),
            status,
            priority: WorkerPriority::Medium,
            capacity,
            current_requests: current,
            total_requests: 0,
            error_count: 0,
            average_response_time: 0.0,
            health_score: 1.0,
            last_used: None,
            specialized_domains: vec![],
            supported_task_types: vec![],
        }
    }

    fn balancer(directory: MockDirectory, strategy: LoadBalancingStrategy) -> LoadBalancer {
        let config = LoadBalancerConfig {
            strategy,
            ..LoadBalancerConfig::default()
        };
        LoadBalancer::new(
            config,
            Arc::new(directory),
            CapabilityMatrix::new(),
            Arc::new(ManualTimeProvider::new()),
        )
    }

    #[tokio::test]
    async fn test_no_eligible_worker() {
        let mut directory = MockDirectory::new();
        directory.expect_snapshot().returning(|| {
            vec![
                worker("a", WorkerStatus::Busy, 1, 1),
                worker("b", WorkerStatus::Unloaded, 0, 1),
            ]
        });
        let lb = balancer(directory, LoadBalancingStrategy::Intelligent);
        assert!(lb
            .select(TaskType::DataAnalysis, TaskPriority::Normal, None, None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_preferred_worker_fast_path() {
        let mut directory = MockDirectory::new();
        directory.expect_snapshot().returning(|| {
            vec![
                worker("idle", WorkerStatus::Ready, 0, 4),
                worker("loaded", WorkerStatus::Ready, 2, 3),
            ]
        });
        let lb = balancer(directory, LoadBalancingStrategy::LeastConnections);
        let decision = lb
            .select(
                TaskType::Forecasting,
                TaskPriority::Low,
                Some("loaded"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.worker, "loaded");
        assert_eq!(decision.confidence, 0.9);
        assert_eq!(decision.reasoning, "Preferred worker specified and available");
        assert_eq!(decision.estimated_processing_time, 60.0);
    }

    #[tokio::test]
    async fn test_unavailable_preferred_worker_falls_back_to_strategy() {
        let mut directory = MockDirectory::new();
        directory.expect_snapshot().returning(|| {
            vec![
                worker("full", WorkerStatus::Ready, 1, 1),
                worker("free", WorkerStatus::Ready, 0, 1),
            ]
        });
        let lb = balancer(directory, LoadBalancingStrategy::LeastConnections);
        let decision = lb
            .select(TaskType::Forecasting, TaskPriority::Normal, Some("full"), None)
            .await
            .unwrap();
        assert_eq!(decision.worker, "free");
        assert_eq!(decision.confidence, 0.7);
        assert_eq!(decision.estimated_wait_time, 30.0);
    }

    #[tokio::test]
    async fn test_assignment_and_outcome_update_metrics() {
        let mut directory = MockDirectory::new();
        directory
            .expect_acquire()
            .withf(|name| name == "a")
            .times(1)
            .returning(|_| true);
        directory
            .expect_release()
            .withf(|name, _, success| name == "a" && !*success)
            .times(1)
            .returning(|_, _, _| ());
        let lb = balancer(directory, LoadBalancingStrategy::Intelligent);

        assert!(lb.record_assignment("a").await);
        assert_eq!(lb.worker_metrics("a").await.unwrap().current_load, 1);

        lb.record_outcome("a", TaskType::Verification, 3.0, false).await;
        let metrics = lb.worker_metrics("a").await.unwrap();
        assert_eq!(metrics.current_load, 0);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.error_rate, 1.0);
    }

    #[tokio::test]
    async fn test_rejected_assignment_does_not_count_load() {
        let mut directory = MockDirectory::new();
        directory.expect_acquire().returning(|_| false);
        let lb = balancer(directory, LoadBalancingStrategy::Intelligent);
        assert!(!lb.record_assignment("a").await);
        assert!(lb.worker_metrics("a").await.is_none());
    }

    #[tokio::test]
    async fn test_processing_estimate_uses_history_median() {
        let mut directory = MockDirectory::new();
        directory
            .expect_snapshot()
            .returning(|| vec![worker("a", WorkerStatus::Ready, 0, 2)]);
        directory.expect_release().returning(|_, _, _| ());
        let lb = balancer(directory, LoadBalancingStrategy::PerformanceBased);

        for time in [10.0, 30.0, 20.0] {
            lb.record_outcome("a", TaskType::MonteCarlo, time, true).await;
        }
        let decision = lb
            .select(TaskType::MonteCarlo, TaskPriority::Normal, None, None)
            .await
            .unwrap();
        assert_eq!(decision.estimated_processing_time, 20.0);
        // 样本不足 5 个时退化为最少连接
        assert_eq!(decision.confidence, 0.7);

        let stats = lb.stats().await;
        assert_eq!(stats.system_load.total_capacity, 2);
        assert!(stats.task_performance.is_empty());
    }
}
