use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orchestrator_config::DispatcherConfig;
use orchestrator_core::models::Task;
use orchestrator_core::{spawn_periodic, OrchestratorError};
use orchestrator_dispatcher::{LoadBalancer, TaskQueue};

use crate::registry::WorkerRegistry;

/// 任务派发器
///
/// 每轮按队列顺序遍历待处理任务：负载均衡器选出Worker，预留槽位，
/// 再从队列领取该Worker可处理的下一个任务并异步执行。
/// 队列没有可领取的任务时归还槽位。
pub struct TaskDispatcher {
    config: DispatcherConfig,
    queue: Arc<TaskQueue>,
    balancer: Arc<LoadBalancer>,
    registry: Arc<WorkerRegistry>,
    in_flight: Arc<AtomicUsize>,
}

impl TaskDispatcher {
    pub fn new(
        config: DispatcherConfig,
        queue: Arc<TaskQueue>,
        balancer: Arc<LoadBalancer>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            config,
            queue,
            balancer,
            registry,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 正在执行的任务数
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 执行一轮派发，返回本轮派发的任务数
    pub async fn dispatch_cycle(&self) -> usize {
        let pending = self.queue.dispatchable(self.config.max_scan_per_cycle).await;
        if pending.is_empty() {
            return 0;
        }

        let mut dispatched = 0;
        for task in pending {
            let Some(decision) = self
                .balancer
                .select(
                    task.task_type,
                    task.priority,
                    task.preferred_worker.as_deref(),
                    Some(&task.context),
                )
                .await
            else {
                continue;
            };

            if !self.balancer.record_assignment(&decision.worker).await {
                continue;
            }

            let supported = self
                .registry
                .status(&decision.worker)
                .await
                .map(|report| report.snapshot.supported_task_types)
                .unwrap_or_default();

            match self.queue.next_for(&decision.worker, &supported).await {
                Some(claimed) => {
                    debug!(
                        "任务 {} 派发到 {} ({})",
                        claimed.id, decision.worker, decision.reasoning
                    );
                    self.spawn_execution(claimed, decision.worker);
                    dispatched += 1;
                }
                None => self.balancer.release_assignment(&decision.worker).await,
            }
        }

        if dispatched > 0 {
            counter!("dispatcher_tasks_dispatched_total").increment(dispatched as u64);
        }
        dispatched
    }

    fn spawn_execution(&self, task: Task, worker: String) {
        let queue = Arc::clone(&self.queue);
        let balancer = Arc::clone(&self.balancer);
        let registry = Arc::clone(&self.registry);
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            queue.mark_running(&task.id).await;
            let started = Instant::now();

            let outcome = match registry.backend(&worker).await {
                Some(backend) => backend.execute(&task).await,
                None => Err(OrchestratorError::worker_not_found(worker.clone())),
            };
            let elapsed = started.elapsed().as_secs_f64();

            let success = match outcome {
                Ok(result) => {
                    queue.complete(&task.id, result).await;
                    true
                }
                Err(e) => {
                    warn!("任务 {} 在 {} 上执行失败: {}", task.id, worker, e);
                    queue.fail(&task.id, &e.to_string(), e.is_retryable()).await;
                    false
                }
            };

            balancer
                .record_outcome(&worker, task.task_type, elapsed, success)
                .await;
            histogram!("dispatcher_execution_seconds", "worker" => worker.clone()).record(elapsed);
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        if !self.config.enabled {
            info!("任务派发已禁用");
            return Vec::new();
        }
        let dispatcher = Arc::clone(self);
        vec![spawn_periodic(
            "task_dispatcher",
            Duration::from_millis(self.config.dispatch_interval_ms),
            shutdown.subscribe(),
            move || {
                let dispatcher = Arc::clone(&dispatcher);
                async move {
                    dispatcher.dispatch_cycle().await;
                }
            },
        )]
    }
}
