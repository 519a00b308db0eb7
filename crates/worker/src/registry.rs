use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use orchestrator_config::RegistryConfig;
use orchestrator_core::models::{
    gib_to_bytes, MemoryClass, MemoryPriority, TaskPriority, TaskType, WorkerPriority,
    WorkerSnapshot, WorkerSpec, WorkerStatus,
};
use orchestrator_core::time::{seconds_between, SharedTimeProvider, Timestamp};
use orchestrator_core::traits::{InferenceBackend, WorkerDirectory};
use orchestrator_core::{spawn_periodic, OrchestratorError, OrchestratorResult};
use orchestrator_infrastructure::MemoryManager;

use crate::backends::build_backend;

const DOMAIN_BONUS: f64 = 0.3;
const PRIORITY_BONUS: f64 = 0.2;
const LOAD_PENALTY: f64 = 0.2;
const RESPONSE_TIME_ADJUSTMENT: f64 = 0.1;
const FAST_RESPONSE_SECONDS: f64 = 30.0;
const SLOW_RESPONSE_SECONDS: f64 = 120.0;
const ERROR_RATE_PENALTY: f64 = 0.3;
const UNHEALTHY_THRESHOLD: f64 = 0.5;

/// Worker路由评分
///
/// `health + 领域加成 + 优先级匹配 - 负载 ± 响应时间 - 错误率`，最低为0。
/// 响应时间和错误率只在有历史请求时计入。
pub fn score_worker(worker: &WorkerSnapshot, task_type: TaskType, priority: WorkerPriority) -> f64 {
    let mut score = worker.health_score;
    if worker.has_domain(task_type) {
        score += DOMAIN_BONUS;
    }
    if worker.priority == priority {
        score += PRIORITY_BONUS;
    }
    score -= LOAD_PENALTY * worker.load_ratio();

    if worker.total_requests > 0 {
        if worker.average_response_time < FAST_RESPONSE_SECONDS {
            score += RESPONSE_TIME_ADJUSTMENT;
        } else if worker.average_response_time > SLOW_RESPONSE_SECONDS {
            score -= RESPONSE_TIME_ADJUSTMENT;
        }
        score -= ERROR_RATE_PENALTY * worker.error_rate();
    }
    score.max(0.0)
}

/// 健康评分，探测失败时为0
pub fn compute_health(
    probe: Option<Duration>,
    error_rate: f64,
    idle_seconds: f64,
    idle_penalty_seconds: u64,
) -> f64 {
    let Some(latency) = probe else {
        return 0.0;
    };
    let mut health = 1.0;
    let latency = latency.as_secs_f64();
    if latency > 10.0 {
        health -= 0.2;
    } else if latency > 5.0 {
        health -= 0.1;
    }
    health -= 0.5 * error_rate;
    if idle_seconds > idle_penalty_seconds as f64 {
        health -= 0.1;
    }
    health.clamp(0.0, 1.0)
}

/// 对外展示的Worker状态
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatusReport {
    #[serde(flatten)]
    pub snapshot: WorkerSnapshot,
    pub model_path: String,
    pub gpu_memory_gb: f64,
    pub ram_memory_gb: f64,
}

struct WorkerEntry {
    spec: WorkerSpec,
    backend: Arc<dyn InferenceBackend>,
    status: WorkerStatus,
    current_requests: u32,
    total_requests: u64,
    error_count: u64,
    average_response_time: f64,
    health_score: f64,
    last_used: Option<Timestamp>,
    reservations: Vec<String>,
}

impl WorkerEntry {
    fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            name: self.spec.name.clone(),
            status: self.status,
            priority: self.spec.priority,
            capacity: self.spec.max_concurrent_requests,
            current_requests: self.current_requests,
            total_requests: self.total_requests,
            error_count: self.error_count,
            average_response_time: self.average_response_time,
            health_score: self.health_score,
            last_used: self.last_used,
            specialized_domains: self.spec.specialized_domains.clone(),
            supported_task_types: self.spec.supported_task_types.clone(),
        }
    }

    fn report(&self) -> WorkerStatusReport {
        WorkerStatusReport {
            snapshot: self.snapshot(),
            model_path: self.spec.model_path.clone(),
            gpu_memory_gb: self.spec.gpu_memory_gb,
            ram_memory_gb: self.spec.ram_memory_gb,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.total_requests as f64
    }

    fn is_loaded(&self) -> bool {
        matches!(self.status, WorkerStatus::Ready | WorkerStatus::Busy)
    }

    /// 释放一个槽位后BUSY回到READY
    fn free_slot(&mut self) {
        self.current_requests = self.current_requests.saturating_sub(1);
        if self.status == WorkerStatus::Busy
            && self.current_requests < self.spec.max_concurrent_requests
        {
            self.status = WorkerStatus::Ready;
        }
    }
}

/// Worker注册表
///
/// 维护每个Worker的生命周期状态机：
/// `UNLOADED → LOADING → READY → {BUSY | ERROR} → UNLOADED`。
/// 加载时在内存管理器中预留加速器内存和模型权重内存，卸载时归还。
pub struct WorkerRegistry {
    config: RegistryConfig,
    memory: Arc<MemoryManager>,
    time: SharedTimeProvider,
    workers: RwLock<Vec<WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new(
        config: RegistryConfig,
        memory: Arc<MemoryManager>,
        time: SharedTimeProvider,
    ) -> OrchestratorResult<Self> {
        Self::with_backends(config, memory, time, HashMap::new())
    }

    /// 指定部分Worker使用的后端，其余按配置创建
    pub fn with_backends(
        config: RegistryConfig,
        memory: Arc<MemoryManager>,
        time: SharedTimeProvider,
        mut backends: HashMap<String, Arc<dyn InferenceBackend>>,
    ) -> OrchestratorResult<Self> {
        let mut workers = Vec::with_capacity(config.workers.len());
        for spec in &config.workers {
            let backend = match backends.remove(&spec.name) {
                Some(backend) => backend,
                None => build_backend(spec)?,
            };
            workers.push(WorkerEntry {
                spec: spec.clone(),
                backend,
                status: WorkerStatus::Unloaded,
                current_requests: 0,
                total_requests: 0,
                error_count: 0,
                average_response_time: 0.0,
                health_score: 1.0,
                last_used: None,
                reservations: Vec::new(),
            });
        }
        info!("Worker注册表初始化: {} 个Worker", workers.len());

        Ok(Self {
            config,
            memory,
            time,
            workers: RwLock::new(workers),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    async fn set_failed(&self, name: &str) {
        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.iter_mut().find(|entry| entry.spec.name == name) {
            entry.status = WorkerStatus::Error;
            entry.error_count += 1;
        }
        counter!("worker_load_failures_total", "worker" => name.to_string()).increment(1);
    }

    async fn release_reservations(&self, reservations: &[String]) {
        for id in reservations {
            self.memory.deallocate(id).await;
        }
    }

    /// 加载Worker
    ///
    /// 资源不足时进入ERROR并返回 `MemoryExhausted`，预热失败同样进入ERROR。
    pub async fn load(&self, name: &str) -> OrchestratorResult<()> {
        let (spec, backend) = {
            let mut workers = self.workers.write().await;
            let entry = workers
                .iter_mut()
                .find(|entry| entry.spec.name == name)
                .ok_or_else(|| OrchestratorError::worker_not_found(name))?;
            match entry.status {
                WorkerStatus::Ready | WorkerStatus::Busy => {
                    debug!("Worker {} 已处于加载状态", name);
                    return Ok(());
                }
                WorkerStatus::Loading => {
                    return Err(OrchestratorError::invalid_state(format!(
                        "Worker {name} 正在加载"
                    )));
                }
                WorkerStatus::Unloaded | WorkerStatus::Error => {}
            }
            entry.status = WorkerStatus::Loading;
            (entry.spec.clone(), Arc::clone(&entry.backend))
        };

        info!("开始加载Worker: {}", name);
        let requirements = [
            (MemoryClass::AcceleratorMemory, gib_to_bytes(spec.gpu_memory_gb)),
            (MemoryClass::ModelWeights, gib_to_bytes(spec.ram_memory_gb)),
        ];
        let mut reservations = Vec::new();
        for (class, bytes) in requirements {
            if bytes == 0 {
                continue;
            }
            match self
                .memory
                .allocate(bytes, class, name, MemoryPriority::High, true)
                .await
            {
                Some(id) => reservations.push(id),
                None => {
                    error!("Worker {} 资源不足: 需要 {} 字节 ({})", name, bytes, class);
                    self.release_reservations(&reservations).await;
                    self.set_failed(name).await;
                    return Err(OrchestratorError::MemoryExhausted {
                        requested: bytes,
                        class,
                    });
                }
            }
        }

        if let Err(e) = backend.warm_up().await {
            error!("Worker {} 预热失败: {}", name, e);
            self.release_reservations(&reservations).await;
            self.set_failed(name).await;
            return Err(e);
        }

        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.iter_mut().find(|entry| entry.spec.name == name) {
            entry.status = WorkerStatus::Ready;
            entry.reservations = reservations;
            entry.health_score = 1.0;
            entry.last_used = Some(self.time.now());
        }
        counter!("worker_loads_total", "worker" => name.to_string()).increment(1);
        info!("Worker {} 加载完成", name);
        Ok(())
    }

    /// 加载配置中的启动Worker，返回成功数量
    pub async fn load_autoload(&self) -> usize {
        let mut loaded = 0;
        for name in &self.config.autoload {
            match self.load(name).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!("启动加载Worker {} 失败: {}", name, e),
            }
        }
        loaded
    }

    async fn unload_inner(&self, name: &str, force: bool) -> OrchestratorResult<bool> {
        let (backend, reservations) = {
            let mut workers = self.workers.write().await;
            let entry = workers
                .iter_mut()
                .find(|entry| entry.spec.name == name)
                .ok_or_else(|| OrchestratorError::worker_not_found(name))?;
            match entry.status {
                WorkerStatus::Unloaded => return Ok(true),
                WorkerStatus::Loading => {
                    warn!("Worker {} 正在加载，无法卸载", name);
                    return Ok(false);
                }
                _ => {}
            }
            if entry.current_requests > 0 && !force {
                warn!(
                    "Worker {} 仍有 {} 个进行中的请求，拒绝卸载",
                    name, entry.current_requests
                );
                return Ok(false);
            }
            let was_loaded = entry.is_loaded();
            entry.status = WorkerStatus::Unloaded;
            entry.current_requests = 0;
            (
                was_loaded.then(|| Arc::clone(&entry.backend)),
                std::mem::take(&mut entry.reservations),
            )
        };

        if let Some(backend) = backend {
            if let Err(e) = backend.shutdown().await {
                warn!("Worker {} 后端关闭失败: {}", name, e);
            }
        }
        self.release_reservations(&reservations).await;
        info!("Worker {} 已卸载", name);
        Ok(true)
    }

    /// 卸载Worker，仍有进行中请求时返回 false
    pub async fn unload(&self, name: &str) -> OrchestratorResult<bool> {
        self.unload_inner(name, false).await
    }

    pub async fn score(
        &self,
        name: &str,
        task_type: TaskType,
        priority: TaskPriority,
    ) -> Option<f64> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .find(|entry| entry.spec.name == name)
            .map(|entry| score_worker(&entry.snapshot(), task_type, priority.into()))
    }

    /// 选出评分最高的可用Worker，首选Worker可用时直接返回
    pub async fn route(
        &self,
        task_type: TaskType,
        priority: TaskPriority,
        preferred: Option<&str>,
    ) -> Option<String> {
        let workers = self.workers.read().await;
        let eligible: Vec<WorkerSnapshot> = workers
            .iter()
            .map(WorkerEntry::snapshot)
            .filter(|worker| worker.is_eligible() && worker.supports(task_type))
            .collect();

        if let Some(preferred) = preferred {
            if eligible.iter().any(|worker| worker.name == preferred) {
                return Some(preferred.to_string());
            }
        }

        let priority = WorkerPriority::from(priority);
        let mut best: Option<(&WorkerSnapshot, f64)> = None;
        for worker in &eligible {
            let score = score_worker(worker, task_type, priority);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((worker, score));
            }
        }
        match best {
            Some((worker, score)) => {
                debug!("任务类型 {} 路由到 {} (评分 {:.2})", task_type, worker.name, score);
                Some(worker.name.clone())
            }
            None => {
                warn!("没有可路由的Worker: {}", task_type);
                None
            }
        }
    }

    /// 重新计算已加载Worker的健康评分
    pub async fn health_check(&self) -> Vec<(String, f64)> {
        let now = self.time.now();
        let targets: Vec<(String, Arc<dyn InferenceBackend>, f64, f64)> = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter(|entry| entry.is_loaded())
                .map(|entry| {
                    let idle = entry
                        .last_used
                        .map_or(0.0, |last_used| seconds_between(last_used, now));
                    (
                        entry.spec.name.clone(),
                        Arc::clone(&entry.backend),
                        entry.error_rate(),
                        idle,
                    )
                })
                .collect()
        };

        let probes = join_all(targets.iter().map(|(_, backend, _, _)| backend.probe())).await;
        let scores: Vec<(String, f64)> = targets
            .iter()
            .zip(probes)
            .map(|((name, _, error_rate, idle), probe)| {
                let latency = match probe {
                    Ok(latency) => Some(latency),
                    Err(e) => {
                        warn!("Worker {} 健康探测失败: {}", name, e);
                        None
                    }
                };
                let health =
                    compute_health(latency, *error_rate, *idle, self.config.idle_penalty_seconds);
                (name.clone(), health)
            })
            .collect();

        let mut workers = self.workers.write().await;
        for (name, health) in &scores {
            if let Some(entry) = workers.iter_mut().find(|entry| &entry.spec.name == name) {
                entry.health_score = *health;
            }
            gauge!("worker_health_score", "worker" => name.clone()).set(*health);
            if *health < UNHEALTHY_THRESHOLD {
                warn!("Worker {} 健康评分过低: {:.2}", name, health);
            }
        }
        scores
    }

    /// 卸载最久未使用的空闲低优先级Worker
    pub async fn handle_resource_pressure(&self) -> Option<String> {
        let candidate = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter(|entry| {
                    entry.status == WorkerStatus::Ready
                        && entry.current_requests == 0
                        && entry.spec.priority == WorkerPriority::Low
                })
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.spec.name.clone())
        };

        let Some(name) = candidate else {
            debug!("没有可卸载的低优先级Worker");
            return None;
        };
        info!("资源压力: 卸载Worker {}", name);
        match self.unload(&name).await {
            Ok(true) => {
                counter!("worker_pressure_unloads_total").increment(1);
                Some(name)
            }
            Ok(false) => None,
            Err(e) => {
                warn!("卸载Worker {} 失败: {}", name, e);
                None
            }
        }
    }

    /// 按资源阈值检查内存使用率
    pub async fn check_resources(&self) -> Option<String> {
        let limits = &self.config.resource_limits;
        let accelerator = self.memory.accelerator_utilization().await;
        let ram = self.memory.ram_utilization().await;
        if accelerator > limits.gpu_utilization_threshold || ram > limits.ram_utilization_threshold
        {
            debug!(
                "资源使用率超过阈值: 加速器 {:.1}%, RAM {:.1}%",
                accelerator * 100.0,
                ram * 100.0
            );
            return self.handle_resource_pressure().await;
        }
        None
    }

    pub async fn status(&self, name: &str) -> Option<WorkerStatusReport> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .find(|entry| entry.spec.name == name)
            .map(WorkerEntry::report)
    }

    pub async fn statuses(&self) -> Vec<WorkerStatusReport> {
        let workers = self.workers.read().await;
        workers.iter().map(WorkerEntry::report).collect()
    }

    pub async fn backend(&self, name: &str) -> Option<Arc<dyn InferenceBackend>> {
        let workers = self.workers.read().await;
        workers
            .iter()
            .find(|entry| entry.spec.name == name)
            .map(|entry| Arc::clone(&entry.backend))
    }

    /// 卸载全部Worker
    pub async fn shutdown(&self) {
        let names: Vec<String> = {
            let workers = self.workers.read().await;
            workers
                .iter()
                .filter(|entry| entry.status != WorkerStatus::Unloaded)
                .map(|entry| entry.spec.name.clone())
                .collect()
        };
        for name in names {
            if let Err(e) = self.unload_inner(&name, true).await {
                warn!("关闭时卸载Worker {} 失败: {}", name, e);
            }
        }
        info!("Worker注册表已关闭");
    }

    /// 启动健康检查、资源检查以及内存压力监听
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let health = {
            let registry = Arc::clone(self);
            spawn_periodic(
                "worker_health_check",
                Duration::from_secs(self.config.health_check_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let registry = Arc::clone(&registry);
                    async move {
                        registry.health_check().await;
                    }
                },
            )
        };

        let resources = {
            let registry = Arc::clone(self);
            spawn_periodic(
                "worker_resource_check",
                Duration::from_secs(self.config.resource_check_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let registry = Arc::clone(&registry);
                    async move {
                        registry.check_resources().await;
                    }
                },
            )
        };

        let pressure = {
            let registry = Arc::clone(self);
            let mut events = self.memory.subscribe_pressure();
            let mut shutdown_rx = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = events.recv() => match event {
                            Ok(event) if event.is_pressure() => {
                                registry.handle_resource_pressure().await;
                            }
                            Ok(_) => {}
                            Err(RecvError::Lagged(skipped)) => {
                                debug!("内存压力事件积压，跳过 {} 条", skipped);
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = shutdown_rx.recv() => {
                            info!("内存压力监听收到关闭信号");
                            break;
                        }
                    }
                }
            })
        };

        vec![health, resources, pressure]
    }
}

#[async_trait]
impl WorkerDirectory for WorkerRegistry {
    async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let workers = self.workers.read().await;
        workers.iter().map(WorkerEntry::snapshot).collect()
    }

    async fn acquire(&self, name: &str) -> bool {
        let now = self.time.now();
        let mut workers = self.workers.write().await;
        let Some(entry) = workers.iter_mut().find(|entry| entry.spec.name == name) else {
            return false;
        };
        if entry.status != WorkerStatus::Ready
            || entry.current_requests >= entry.spec.max_concurrent_requests
        {
            return false;
        }
        entry.current_requests += 1;
        entry.last_used = Some(now);
        if entry.current_requests >= entry.spec.max_concurrent_requests {
            entry.status = WorkerStatus::Busy;
        }
        true
    }

    async fn release(&self, name: &str, response_time: f64, success: bool) {
        let now = self.time.now();
        let mut workers = self.workers.write().await;
        let Some(entry) = workers.iter_mut().find(|entry| entry.spec.name == name) else {
            return;
        };
        entry.free_slot();
        entry.total_requests += 1;
        if !success {
            entry.error_count += 1;
        }
        let total = entry.total_requests as f64;
        entry.average_response_time =
            (entry.average_response_time * (total - 1.0) + response_time) / total;
        entry.last_used = Some(now);
    }

    async fn cancel_reservation(&self, name: &str) {
        let mut workers = self.workers.write().await;
        if let Some(entry) = workers.iter_mut().find(|entry| entry.spec.name == name) {
            entry.free_slot();
        }
    }
}
