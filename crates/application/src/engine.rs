use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use orchestrator_config::AppConfig;
use orchestrator_core::time::{system_time, SharedTimeProvider};
use orchestrator_core::traits::{InferenceBackend, WorkerDirectory};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_dispatcher::{LoadBalancer, TaskQueue};
use orchestrator_infrastructure::MemoryManager;
use orchestrator_worker::{TaskDispatcher, WorkerRegistry};

use crate::coordinator::Coordinator;

/// 编排引擎
///
/// 持有全部组件实例，后台任务通过 `Arc` 句柄访问，不存在进程级全局状态。
pub struct OrchestrationEngine {
    config: AppConfig,
    queue: Arc<TaskQueue>,
    balancer: Arc<LoadBalancer>,
    memory: Arc<MemoryManager>,
    registry: Arc<WorkerRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    coordinator: Arc<Coordinator>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl OrchestrationEngine {
    pub fn build(config: AppConfig) -> OrchestratorResult<Self> {
        Self::build_with(config, system_time(), HashMap::new())
    }

    /// 使用指定的时间源和部分Worker后端构建引擎
    pub fn build_with(
        config: AppConfig,
        time: SharedTimeProvider,
        backends: HashMap<String, Arc<dyn InferenceBackend>>,
    ) -> OrchestratorResult<Self> {
        let capabilities = config
            .registry
            .capability_matrix()
            .map_err(|e| OrchestratorError::config_error(e.to_string()))?;

        let memory = Arc::new(MemoryManager::from_config(
            config.memory.clone(),
            Arc::clone(&time),
        ));
        let registry = Arc::new(WorkerRegistry::with_backends(
            config.registry.clone(),
            Arc::clone(&memory),
            Arc::clone(&time),
            backends,
        )?);
        let queue = Arc::new(TaskQueue::new(config.queue.clone(), Arc::clone(&time)));
        let balancer = Arc::new(LoadBalancer::new(
            config.load_balancer.clone(),
            Arc::clone(&registry) as Arc<dyn WorkerDirectory>,
            capabilities,
            Arc::clone(&time),
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            config.dispatcher.clone(),
            Arc::clone(&queue),
            Arc::clone(&balancer),
            Arc::clone(&registry),
        ));
        let coordinator = Arc::new(Coordinator::new(
            config.coordinator.clone(),
            Arc::clone(&queue),
            Arc::clone(&balancer),
            Arc::clone(&memory),
            Arc::clone(&registry),
            time,
        ));

        info!(
            "编排引擎已构建: {} 个Worker, 负载均衡策略 {}",
            config.registry.workers.len(),
            balancer.strategy_name()
        );
        Ok(Self {
            config,
            queue,
            balancer,
            memory,
            registry,
            dispatcher,
            coordinator,
            handles: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// 加载启动Worker并启动全部后台循环，返回成功加载的Worker数量
    pub async fn start(&self, shutdown: &broadcast::Sender<()>) -> usize {
        let loaded = self.registry.load_autoload().await;
        if loaded < self.registry.config().autoload.len() {
            warn!(
                "部分启动Worker加载失败: {}/{}",
                loaded,
                self.registry.config().autoload.len()
            );
        }

        let mut handles = self.handles.lock().await;
        handles.extend(self.memory.start(shutdown));
        handles.extend(self.queue.start(shutdown));
        handles.extend(self.balancer.start(shutdown));
        handles.extend(self.registry.start(shutdown));
        handles.extend(self.dispatcher.start(shutdown));
        handles.extend(self.coordinator.start(shutdown));
        info!("编排引擎已启动: {} 个后台任务", handles.len());
        loaded
    }

    /// 等待后台任务退出，然后卸载Worker并释放内存
    ///
    /// 调用前应已发送关闭信号。
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("后台任务退出异常: {}", e);
            }
        }
        self.registry.shutdown().await;
        self.memory.shutdown().await;
        info!("编排引擎已关闭");
    }
}
