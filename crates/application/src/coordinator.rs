use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, gauge};
use serde_json::{json, Map, Value};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orchestrator_config::CoordinatorConfig;
use orchestrator_core::models::{
    TaskId, TaskPriority, TaskStatus, TaskStatusInfo, TaskSubmission, TaskType, WorkerStatus,
};
use orchestrator_core::time::SharedTimeProvider;
use orchestrator_core::{spawn_periodic, OrchestratorResult};
use orchestrator_dispatcher::{LoadBalancer, TaskQueue};
use orchestrator_infrastructure::MemoryManager;
use orchestrator_worker::WorkerRegistry;

use crate::analysis::{
    consensus_confidence, consensus_ratio, AnalysisKind, AnalysisRequest, AnalysisResult,
    AnalysisStatus, CoordinatorSummary, HealthAlert, PerformanceCounters, SystemPerformance,
};
use crate::framing::{policy_type, AnalysisFraming};

struct ActiveAnalysis {
    request: AnalysisRequest,
}

/// 已完成分析的有界存档，超过上限时丢弃最早的记录
#[derive(Default)]
struct CompletedArchive {
    results: HashMap<TaskId, AnalysisResult>,
    order: VecDeque<TaskId>,
}

impl CompletedArchive {
    fn insert(&mut self, result: AnalysisResult, limit: usize) {
        let id = result.request_id.clone();
        if self.results.insert(id.clone(), result).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > limit {
            if let Some(oldest) = self.order.pop_front() {
                self.results.remove(&oldest);
            }
        }
    }
}

/// 分析协调器
///
/// 把分析请求包装后提交到任务队列，后台轮询跟踪中的分析：完成时按需
/// 发起多Worker验证并计算置信度，失败或超时时记录失败。
pub struct Coordinator {
    config: CoordinatorConfig,
    queue: Arc<TaskQueue>,
    balancer: Arc<LoadBalancer>,
    memory: Arc<MemoryManager>,
    registry: Arc<WorkerRegistry>,
    framing: AnalysisFraming,
    time: SharedTimeProvider,
    active: RwLock<HashMap<TaskId, ActiveAnalysis>>,
    completed: RwLock<CompletedArchive>,
    counters: RwLock<PerformanceCounters>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        queue: Arc<TaskQueue>,
        balancer: Arc<LoadBalancer>,
        memory: Arc<MemoryManager>,
        registry: Arc<WorkerRegistry>,
        time: SharedTimeProvider,
    ) -> Self {
        let framing = AnalysisFraming::new(
            config.analysis_context.clone(),
            config.multi_worker_verification,
        );
        Self {
            config,
            queue,
            balancer,
            memory,
            registry,
            framing,
            time,
            active: RwLock::new(HashMap::new()),
            completed: RwLock::new(CompletedArchive::default()),
            counters: RwLock::new(PerformanceCounters::default()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 提交分析请求，返回任务ID
    pub async fn submit_analysis(&self, request: AnalysisRequest) -> OrchestratorResult<TaskId> {
        let task_type = request.kind.task_type();
        let context = self.framing.frame_context(&request.context, self.time.now());
        let content = self.framing.frame_content(&request.content, request.kind);

        let mut submission = TaskSubmission::new(task_type, content)
            .with_priority(request.priority)
            .with_context(context)
            .with_timeout(request.timeout_seconds);
        if let Some(worker) = request.preferred_workers.first() {
            submission = submission.with_preferred_worker(worker.clone());
        }
        if let Some(callback) = &request.callback {
            submission = submission.with_callback(Arc::clone(callback));
        }

        let id = self.queue.submit(submission).await?;
        let kind = request.kind;
        let active = {
            let mut active = self.active.write().await;
            active.insert(id.clone(), ActiveAnalysis { request });
            active.len()
        };
        gauge!("coordinator_active_analyses").set(active as f64);
        info!(task_id = %id, kind = %kind, "已提交分析");
        Ok(id)
    }

    /// 查询分析状态；已归档的分析附带结果
    pub async fn get_status(&self, id: &str) -> Option<AnalysisStatus> {
        let result = self.completed.read().await.results.get(id).cloned();
        match self.queue.status(id).await {
            Some(info) => Some(Self::status_from(info, result)),
            None => result.map(|result| AnalysisStatus {
                request_id: result.request_id.clone(),
                status: TaskStatus::Completed,
                created_at: None,
                assigned_worker: result.workers_used.first().cloned(),
                retry_count: 0,
                processing_time: Some(result.processing_time),
                error: None,
                result: Some(result),
            }),
        }
    }

    fn status_from(info: TaskStatusInfo, result: Option<AnalysisResult>) -> AnalysisStatus {
        AnalysisStatus {
            request_id: info.id,
            status: info.status,
            created_at: Some(info.created_at),
            assigned_worker: info.assigned_worker,
            retry_count: info.retry_count,
            processing_time: info.processing_time,
            error: info.error,
            result,
        }
    }

    /// 取消分析，不会中断已在执行的调用
    pub async fn cancel(&self, id: &str) -> bool {
        let cancelled = self.queue.cancel(id).await;
        if cancelled {
            self.active.write().await.remove(id);
            info!(task_id = id, "分析已取消");
        }
        cancelled
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn counters(&self) -> PerformanceCounters {
        self.counters.read().await.clone()
    }

    /// 汇总各组件统计
    pub async fn get_performance_snapshot(&self) -> SystemPerformance {
        let coordinator = CoordinatorSummary {
            active_analyses: self.active.read().await.len(),
            completed_analyses: self.completed.read().await.results.len(),
            performance: self.counters.read().await.clone(),
        };
        SystemPerformance {
            coordinator,
            workers: self.registry.statuses().await,
            queue: self.queue.stats().await,
            load_balancer: self.balancer.stats().await,
            memory: self.memory.stats().await,
        }
    }

    /// 生成经济假设
    pub async fn generate_hypothesis(
        &self,
        data: Map<String, Value>,
        focus_areas: Option<Vec<String>>,
    ) -> OrchestratorResult<TaskId> {
        let focus_areas =
            focus_areas.unwrap_or_else(|| self.framing.specialization_areas().to_vec());
        let content = self.framing.hypothesis_content(&data, &focus_areas);

        let mut context = Map::new();
        context.insert(
            "data_series".to_string(),
            json!(data.keys().cloned().collect::<Vec<_>>()),
        );
        context.insert("focus_areas".to_string(), json!(focus_areas));
        context.insert("region".to_string(), json!(self.framing.focus_region()));

        let request = AnalysisRequest::new(AnalysisKind::HypothesisGeneration, content)
            .with_context(context)
            .with_priority(TaskPriority::High);
        self.submit_analysis(request).await
    }

    /// 政策影响分析
    pub async fn analyze_policy_impact(
        &self,
        description: &str,
        indicators: Map<String, Value>,
        simulation: Option<Map<String, Value>>,
    ) -> OrchestratorResult<TaskId> {
        let content = self.framing.policy_content(description, &indicators);

        let mut context = Map::new();
        context.insert("policy_type".to_string(), json!(policy_type(description)));
        context.insert(
            "indicators".to_string(),
            json!(indicators.keys().cloned().collect::<Vec<_>>()),
        );
        context.insert(
            "simulation_params".to_string(),
            Value::Object(simulation.unwrap_or_default()),
        );
        context.insert("regional_context".to_string(), json!(true));

        let request = AnalysisRequest::new(AnalysisKind::PolicyAnalysis, content)
            .with_context(context)
            .with_priority(TaskPriority::High)
            .with_verification(true);
        self.submit_analysis(request).await
    }

    /// 向每个READY的验证Worker提交验证任务，并在限定时间内等待结果
    pub async fn run_verification(
        &self,
        content: &str,
        primary_result: Option<&Value>,
        kind: AnalysisKind,
    ) -> Vec<Value> {
        let verification = self.framing.verification_content(content, primary_result, kind);
        let mut submitted = Vec::new();
        for worker in &self.config.verification_workers {
            let ready = self
                .registry
                .status(worker)
                .await
                .is_some_and(|report| report.snapshot.status == WorkerStatus::Ready);
            if !ready {
                debug!("验证Worker {} 未就绪，跳过", worker);
                continue;
            }
            let submission = TaskSubmission::new(TaskType::Verification, verification.clone())
                .with_priority(TaskPriority::High)
                .with_preferred_worker(worker.clone())
                .with_timeout(self.config.verification_timeout_seconds);
            match self.queue.submit(submission).await {
                Ok(id) => submitted.push(id),
                Err(e) => warn!("提交验证任务到 {} 失败: {}", worker, e),
            }
        }
        if submitted.is_empty() {
            return Vec::new();
        }

        let wait = Duration::from_secs(self.config.verification_wait_seconds);
        let poll = Duration::from_millis(self.config.verification_poll_interval_ms);
        let finished = tokio::time::timeout(wait, async {
            loop {
                let mut all_terminal = true;
                for id in &submitted {
                    if !self
                        .queue
                        .status(id)
                        .await
                        .is_some_and(|info| info.status.is_terminal())
                    {
                        all_terminal = false;
                        break;
                    }
                }
                if all_terminal {
                    break;
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await;
        if finished.is_err() {
            warn!("等待验证结果超时 ({}s)", wait.as_secs());
        }

        let mut results = Vec::new();
        for id in &submitted {
            if let Some(info) = self.queue.status(id).await {
                if info.status == TaskStatus::Completed {
                    if let Some(result) = info.result {
                        results.push(result);
                    }
                }
            }
        }
        results
    }

    async fn handle_completed(&self, id: TaskId, analysis: ActiveAnalysis, info: TaskStatusInfo) {
        let request = analysis.request;
        let verify = request.verification_required && self.config.multi_worker_verification;

        let (verification_results, confidence_score) = if verify {
            let results = self
                .run_verification(&request.content, info.result.as_ref(), request.kind)
                .await;
            let confidence = consensus_confidence(
                &results,
                self.config.consensus_threshold,
                self.config.empty_verification_confidence,
            );
            (Some(results), confidence)
        } else {
            (None, self.config.default_confidence)
        };

        let processing_time = info.processing_time.unwrap_or(0.0);
        let result = AnalysisResult {
            request_id: id.clone(),
            kind: request.kind,
            primary_result: info.result,
            verification_results,
            confidence_score,
            processing_time,
            workers_used: info.assigned_worker.into_iter().collect(),
            completed_at: self.time.now(),
        };

        {
            let mut counters = self.counters.write().await;
            counters.record_success(processing_time);
            if let Some(ratio) = result
                .verification_results
                .as_deref()
                .and_then(consensus_ratio)
            {
                counters.record_verification(ratio >= self.config.consensus_threshold);
            }
        }
        self.completed
            .write()
            .await
            .insert(result, self.config.completed_history_limit);

        counter!("coordinator_analyses_total", "outcome" => "success").increment(1);
        info!(task_id = %id, confidence = confidence_score, "分析完成，置信度 {:.2}", confidence_score);
    }

    async fn handle_failed(&self, id: TaskId, info: TaskStatusInfo) {
        self.counters.write().await.record_failure();
        counter!("coordinator_analyses_total", "outcome" => "failure").increment(1);
        warn!(
            task_id = %id,
            status = %info.status,
            "分析失败: {}",
            info.error.as_deref().unwrap_or("unknown error")
        );
    }

    /// 检查跟踪中的分析，返回本轮处理完毕的数量
    pub async fn reconcile(&self) -> usize {
        let ids: Vec<TaskId> = self.active.read().await.keys().cloned().collect();
        let mut finished = Vec::new();
        for id in ids {
            match self.queue.status(&id).await {
                Some(info) if info.status == TaskStatus::Completed => finished.push((id, info)),
                Some(info) if matches!(info.status, TaskStatus::Failed | TaskStatus::Timeout) => {
                    finished.push((id, info))
                }
                Some(info) if info.status == TaskStatus::Cancelled => {
                    self.active.write().await.remove(&id);
                }
                Some(_) => {}
                None => {
                    warn!(task_id = %id, "跟踪中的分析已不在队列中");
                    self.active.write().await.remove(&id);
                }
            }
        }
        if finished.is_empty() {
            return 0;
        }

        // 先移出活跃集合，避免下一轮重复处理
        let claimed: Vec<(TaskId, ActiveAnalysis, TaskStatusInfo)> = {
            let mut active = self.active.write().await;
            finished
                .into_iter()
                .filter_map(|(id, info)| active.remove(&id).map(|analysis| (id, analysis, info)))
                .collect()
        };
        let handled = claimed.len();

        join_all(claimed.into_iter().map(|(id, analysis, info)| async move {
            if info.status == TaskStatus::Completed {
                self.handle_completed(id, analysis, info).await;
            } else {
                self.handle_failed(id, info).await;
            }
        }))
        .await;

        gauge!("coordinator_active_analyses").set(self.active.read().await.len() as f64);
        handled
    }

    /// 检查系统健康并输出告警，不会影响任务流转
    pub async fn check_health(&self) -> Vec<HealthAlert> {
        let memory_utilization = self.memory.stats().await.system.utilization;
        let pending_tasks = self.queue.pending_count().await;
        let unhealthy: Vec<String> = self
            .registry
            .statuses()
            .await
            .into_iter()
            .filter(|report| report.snapshot.health_score < self.config.health_alert_threshold)
            .map(|report| report.snapshot.name)
            .collect();

        let mut alerts = Vec::new();
        if memory_utilization > self.config.memory_alert_threshold {
            warn!("内存使用率过高: {:.1}%", memory_utilization * 100.0);
            alerts.push(HealthAlert::HighMemoryUsage {
                utilization: memory_utilization,
            });
        }
        if pending_tasks > self.config.backlog_alert_threshold {
            warn!("任务积压: {} 个待处理任务", pending_tasks);
            alerts.push(HealthAlert::QueueBacklog { pending_tasks });
        }
        if !unhealthy.is_empty() {
            warn!("检测到不健康的Worker: {:?}", unhealthy);
            alerts.push(HealthAlert::UnhealthyWorkers { workers: unhealthy });
        }

        for alert in &alerts {
            counter!("coordinator_health_alerts_total", "kind" => alert.as_str()).increment(1);
        }
        let active = self.active.read().await.len();
        debug!(memory_utilization, pending_tasks, active, "系统健康检查完成");
        alerts
    }

    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let reconcile = {
            let coordinator = Arc::clone(self);
            spawn_periodic(
                "analysis_reconcile",
                Duration::from_secs(self.config.reconcile_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator.reconcile().await;
                    }
                },
            )
        };
        let health = {
            let coordinator = Arc::clone(self);
            spawn_periodic(
                "system_health_check",
                Duration::from_secs(self.config.health_check_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let coordinator = Arc::clone(&coordinator);
                    async move {
                        coordinator.check_health().await;
                    }
                },
            )
        };
        vec![reconcile, health]
    }
}
