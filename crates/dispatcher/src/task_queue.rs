//! 优先级任务队列
//!
//! 队列按 (优先级, 创建时间) 排序保存待处理任务，并维护重试/超时状态机：
//!
//! `PENDING → QUEUED → ASSIGNED → RUNNING → {COMPLETED | FAILED | TIMEOUT | CANCELLED}`
//!
//! 失败或超时的任务在剩余重试次数内回到 QUEUED，等待 `min(60, 2^retry_count)` 秒的退避；
//! 退避通过把创建时间推迟到未来实现，退避结束前 `next_for` 不会返回该任务。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orchestrator_config::QueueConfig;
use orchestrator_core::models::{
    Task, TaskCallback, TaskId, TaskStatus, TaskStatusInfo, TaskSubmission, TaskType,
};
use orchestrator_core::time::{seconds_between, SharedTimeProvider, Timestamp};
use orchestrator_core::{spawn_periodic, OrchestratorError, OrchestratorResult};

use crate::queue_events::QueueEvent;

/// 优先级队列中的排序键
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PendingKey {
    priority: u8,
    created_at: Timestamp,
    sequence: u64,
    id: TaskId,
}

#[derive(Debug, Default)]
struct QueueCounters {
    submitted: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    timed_out: u64,
    retried: u64,
    total_wait_time: f64,
    wait_samples: u64,
    total_processing_time: f64,
    processing_samples: u64,
}

/// 单个Worker在队列视角下的使用情况
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerUtilization {
    pub completed_tasks: u64,
    pub total_processing_time: f64,
    pub average_processing_time: f64,
}

#[derive(Default)]
struct QueueState {
    tasks: HashMap<TaskId, Task>,
    pending: BTreeSet<PendingKey>,
    pending_keys: HashMap<TaskId, PendingKey>,
    running: HashSet<TaskId>,
    sequence: u64,
    counters: QueueCounters,
    worker_utilization: HashMap<String, WorkerUtilization>,
    recent_completions: VecDeque<Timestamp>,
}

impl QueueState {
    fn enqueue(&mut self, id: &TaskId, priority: u8, created_at: Timestamp) {
        self.sequence += 1;
        let key = PendingKey {
            priority,
            created_at,
            sequence: self.sequence,
            id: id.clone(),
        };
        self.pending.insert(key.clone());
        self.pending_keys.insert(id.clone(), key);
    }

    fn dequeue(&mut self, id: &TaskId) -> bool {
        match self.pending_keys.remove(id) {
            Some(key) => self.pending.remove(&key),
            None => false,
        }
    }

    fn record_processing(&mut self, task: &Task, now: Timestamp) {
        if let Some(processing_time) = task.processing_time() {
            self.counters.total_processing_time += processing_time;
            self.counters.processing_samples += 1;
            if let Some(worker) = &task.assigned_worker {
                let usage = self.worker_utilization.entry(worker.clone()).or_default();
                usage.completed_tasks += 1;
                usage.total_processing_time += processing_time;
                usage.average_processing_time =
                    usage.total_processing_time / usage.completed_tasks as f64;
            }
        }
        self.recent_completions.push_back(now);
    }
}

/// 失败处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 已重新入队，附带退避秒数
    Retried { retry_count: u32, backoff_seconds: u64 },
    /// 进入终态（FAILED 或 TIMEOUT）
    Terminal(TaskStatus),
}

/// 队列统计
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub submitted_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    pub timed_out_tasks: u64,
    pub retried_tasks: u64,
    pub average_wait_time: f64,
    pub average_processing_time: f64,
    pub throughput_per_minute: f64,
    pub task_type_distribution: HashMap<TaskType, u64>,
    pub worker_utilization: HashMap<String, WorkerUtilization>,
    pub queue_capacity_used: f64,
}

/// 任务队列
pub struct TaskQueue {
    config: QueueConfig,
    time: SharedTimeProvider,
    state: RwLock<QueueState>,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig, time: SharedTimeProvider) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            time,
            state: RwLock::new(QueueState::default()),
            events,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// 订阅队列事件
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: QueueEvent) {
        // 没有订阅者时发送失败是正常情况
        let _ = self.events.send(event);
    }

    /// 提交任务
    pub async fn submit(&self, mut submission: TaskSubmission) -> OrchestratorResult<TaskId> {
        if submission.content.trim().is_empty() {
            return Err(OrchestratorError::validation_error("任务内容不能为空"));
        }
        if submission.timeout_seconds == Some(0) {
            return Err(OrchestratorError::validation_error("任务超时时间必须大于0"));
        }
        if let Some(worker) = &submission.preferred_worker {
            if worker.trim().is_empty() {
                return Err(OrchestratorError::validation_error("首选Worker名称不能为空"));
            }
        }
        submission.max_retries = submission
            .max_retries
            .or(Some(self.config.default_max_retries));
        submission.timeout_seconds = submission
            .timeout_seconds
            .or(Some(self.config.default_timeout_seconds));

        let now = self.time.now();
        let (id, task_type, priority, pending) = {
            let mut state = self.state.write().await;
            if state.tasks.len() >= self.config.max_queue_size {
                warn!(
                    "任务队列已满，拒绝提交 (容量: {})",
                    self.config.max_queue_size
                );
                counter!("orchestrator_queue_rejected_total").increment(1);
                return Err(OrchestratorError::QueueFull {
                    max_size: self.config.max_queue_size,
                });
            }

            let mut task = Task::new(submission, now);
            task.status = TaskStatus::Queued;
            let id = task.id.clone();
            let (task_type, priority) = (task.task_type, task.priority);

            state.enqueue(&id, priority.value(), task.created_at);
            state.tasks.insert(id.clone(), task);
            state.counters.submitted += 1;
            (id, task_type, priority, state.pending.len())
        };

        counter!("orchestrator_tasks_submitted_total", "task_type" => task_type.as_str())
            .increment(1);
        gauge!("orchestrator_queue_pending").set(pending as f64);
        info!(
            task_id = %id,
            task_type = %task_type,
            priority = ?priority,
            "任务已提交"
        );
        self.publish(QueueEvent::Submitted {
            task_id: id.clone(),
            task_type,
        });
        Ok(id)
    }

    /// 为指定Worker取出下一个可执行任务
    ///
    /// 按优先级和创建时间扫描，跳过不支持的类型、首选Worker不匹配或仍在退避中的任务。
    /// `supported_types` 为空表示支持全部类型。
    pub async fn next_for(&self, worker: &str, supported_types: &[TaskType]) -> Option<Task> {
        let now = self.time.now();
        let task = {
            let mut state = self.state.write().await;
            let key = state
                .pending
                .iter()
                .find(|key| {
                    if key.created_at > now {
                        return false;
                    }
                    state.tasks.get(&key.id).is_some_and(|task| {
                        task.status == TaskStatus::Queued
                            && (supported_types.is_empty()
                                || supported_types.contains(&task.task_type))
                            && task
                                .preferred_worker
                                .as_deref()
                                .is_none_or(|preferred| preferred == worker)
                    })
                })
                .cloned()?;

            state.pending.remove(&key);
            state.pending_keys.remove(&key.id);
            let task = state.tasks.get_mut(&key.id)?;
            task.status = TaskStatus::Assigned;
            task.assigned_at = Some(now);
            task.assigned_worker = Some(worker.to_string());
            let task = task.clone();

            if let Some(wait_time) = task.wait_time() {
                state.counters.total_wait_time += wait_time.max(0.0);
                state.counters.wait_samples += 1;
            }
            state.running.insert(task.id.clone());
            gauge!("orchestrator_queue_pending").set(state.pending.len() as f64);
            gauge!("orchestrator_queue_running").set(state.running.len() as f64);
            task
        };

        debug!(task_id = %task.id, worker = worker, "任务已分配");
        if let Some(wait_time) = task.wait_time() {
            histogram!("orchestrator_task_wait_seconds").record(wait_time.max(0.0));
        }
        self.publish(QueueEvent::Assigned {
            task_id: task.id.clone(),
            worker: worker.to_string(),
        });
        Some(task)
    }

    /// ASSIGNED → RUNNING
    pub async fn mark_running(&self, id: &str) -> bool {
        let now = self.time.now();
        let mut state = self.state.write().await;
        match state.tasks.get_mut(id) {
            Some(task) if task.status == TaskStatus::Assigned => {
                task.status = TaskStatus::Running;
                task.started_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// 标记任务完成，仅对 ASSIGNED/RUNNING 有效
    pub async fn complete(&self, id: &str, result: Value) -> bool {
        let now = self.time.now();
        let (task, callback) = {
            let mut state = self.state.write().await;
            let Some(task) = state.tasks.get_mut(id) else {
                return false;
            };
            if !task.status.is_in_flight() {
                debug!(task_id = id, status = %task.status, "忽略非运行中任务的完成结果");
                return false;
            }
            task.status = TaskStatus::Completed;
            task.completed_at = Some(now);
            task.result = Some(result);
            task.error = None;
            let task = task.clone();

            state.running.remove(id);
            state.counters.completed += 1;
            state.record_processing(&task, now);
            gauge!("orchestrator_queue_running").set(state.running.len() as f64);
            let callback = task.callback.clone();
            (task, callback)
        };

        counter!("orchestrator_tasks_completed_total", "task_type" => task.task_type.as_str())
            .increment(1);
        if let Some(processing_time) = task.processing_time() {
            histogram!("orchestrator_task_processing_seconds").record(processing_time);
        }
        info!(
            task_id = id,
            worker = task.assigned_worker.as_deref().unwrap_or("-"),
            "任务已完成"
        );

        Self::invoke_callback(callback, &task);
        self.publish(QueueEvent::Completed {
            task_id: task.id.clone(),
            worker: task.assigned_worker.clone(),
        });
        true
    }

    fn invoke_callback(callback: Option<TaskCallback>, task: &Task) {
        if let Some(callback) = callback {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(task)));
            if outcome.is_err() {
                warn!(task_id = %task.id, "任务回调执行时发生panic");
            }
        }
    }

    /// 标记任务失败
    ///
    /// `retry` 为真且仍有剩余重试次数时重新入队，否则进入 FAILED。
    pub async fn fail(&self, id: &str, error: &str, retry: bool) -> bool {
        self.fail_with(id, error, retry, TaskStatus::Failed)
            .await
            .is_some()
    }

    /// 与 [`TaskQueue::fail`] 相同，但返回处理结果
    pub async fn fail_with(
        &self,
        id: &str,
        error: &str,
        retry: bool,
        terminal_status: TaskStatus,
    ) -> Option<FailureOutcome> {
        let now = self.time.now();
        let (outcome, task) = {
            let mut state = self.state.write().await;
            let outcome = self.fail_locked(&mut state, id, error, retry, terminal_status, now)?;
            let task = state.tasks.get(id)?.clone();
            (outcome, task)
        };
        self.announce_failure(&task, outcome);
        Some(outcome)
    }

    fn fail_locked(
        &self,
        state: &mut QueueState,
        id: &str,
        error: &str,
        retry: bool,
        terminal_status: TaskStatus,
        now: Timestamp,
    ) -> Option<FailureOutcome> {
        let task = state.tasks.get(id)?;
        if task.status.is_terminal() {
            return None;
        }
        let in_flight = task.status.is_in_flight();
        let can_retry = retry && in_flight && task.retry_count < task.max_retries;

        let id = task.id.clone();
        state.running.remove(&id);
        state.dequeue(&id);

        let task = state.tasks.get_mut(&id)?;
        task.error = Some(error.to_string());

        if can_retry {
            task.retry_count += 1;
            let backoff_seconds = 2u64
                .saturating_pow(task.retry_count)
                .min(self.config.max_backoff_seconds);
            task.created_at = now + ChronoDuration::seconds(backoff_seconds as i64);
            task.status = TaskStatus::Queued;
            task.assigned_at = None;
            task.started_at = None;
            task.assigned_worker = None;
            let (retry_count, priority, created_at) =
                (task.retry_count, task.priority.value(), task.created_at);

            state.enqueue(&id, priority, created_at);
            state.counters.retried += 1;
            Some(FailureOutcome::Retried {
                retry_count,
                backoff_seconds,
            })
        } else {
            task.status = terminal_status;
            task.completed_at = Some(now);
            let task = task.clone();
            match terminal_status {
                TaskStatus::Timeout => state.counters.timed_out += 1,
                _ => state.counters.failed += 1,
            }
            state.record_processing(&task, now);
            Some(FailureOutcome::Terminal(terminal_status))
        }
    }

    fn announce_failure(&self, task: &Task, outcome: FailureOutcome) {
        let error = task.error.clone().unwrap_or_default();
        match outcome {
            FailureOutcome::Retried {
                retry_count,
                backoff_seconds,
            } => {
                counter!("orchestrator_tasks_retried_total").increment(1);
                warn!(
                    task_id = %task.id,
                    retry_count,
                    max_retries = task.max_retries,
                    backoff_seconds,
                    "任务失败，{}秒后重试: {}",
                    backoff_seconds,
                    error
                );
                self.publish(QueueEvent::Retried {
                    task_id: task.id.clone(),
                    retry_count,
                    backoff_seconds,
                });
            }
            FailureOutcome::Terminal(status) => {
                counter!("orchestrator_tasks_failed_total", "status" => status.as_str())
                    .increment(1);
                warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    status = %status,
                    "任务最终失败: {}",
                    error
                );
                let event = if status == TaskStatus::Timeout {
                    QueueEvent::TimedOut {
                        task_id: task.id.clone(),
                    }
                } else {
                    QueueEvent::Failed {
                        task_id: task.id.clone(),
                        error,
                    }
                };
                self.publish(event);
            }
        }
    }

    /// 取消任务，仅对非终态有效；不会中断已在执行的外部调用
    pub async fn cancel(&self, id: &str) -> bool {
        let now = self.time.now();
        {
            let mut state = self.state.write().await;
            let Some(task) = state.tasks.get(id) else {
                return false;
            };
            if task.status.is_terminal() {
                return false;
            }
            let id = task.id.clone();
            state.dequeue(&id);
            state.running.remove(&id);
            if let Some(task) = state.tasks.get_mut(&id) {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            }
            state.counters.cancelled += 1;
        }

        counter!("orchestrator_tasks_cancelled_total").increment(1);
        info!(task_id = id, "任务已取消");
        self.publish(QueueEvent::Cancelled {
            task_id: id.to_string(),
        });
        true
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatusInfo> {
        let state = self.state.read().await;
        state.tasks.get(id).map(Task::status_info)
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        let state = self.state.read().await;
        state.tasks.get(id).cloned()
    }

    /// 按派发顺序返回当前可派发的任务（不含退避中的任务）
    pub async fn dispatchable(&self, limit: usize) -> Vec<Task> {
        let now = self.time.now();
        let state = self.state.read().await;
        state
            .pending
            .iter()
            .filter(|key| key.created_at <= now)
            .filter_map(|key| state.tasks.get(&key.id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn pending_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    /// 扫描运行超时的任务，超时按可重试失败处理，重试耗尽后进入 TIMEOUT
    pub async fn sweep_timeouts(&self) -> usize {
        let now = self.time.now();
        let mut announcements = Vec::new();
        {
            let mut state = self.state.write().await;
            let expired: Vec<(TaskId, u64)> = state
                .running
                .iter()
                .filter_map(|id| state.tasks.get(id))
                .filter(|task| {
                    task.started_at
                        .or(task.assigned_at)
                        .is_some_and(|started| {
                            seconds_between(started, now) > task.timeout_seconds as f64
                        })
                })
                .map(|task| (task.id.clone(), task.timeout_seconds))
                .collect();

            for (id, timeout_seconds) in expired {
                let error = OrchestratorError::TaskTimeout {
                    task_id: id.clone(),
                    timeout_seconds,
                }
                .to_string();
                if let Some(outcome) =
                    self.fail_locked(&mut state, &id, &error, true, TaskStatus::Timeout, now)
                {
                    if let Some(task) = state.tasks.get(&id) {
                        announcements.push((task.clone(), outcome));
                    }
                }
            }
        }

        let count = announcements.len();
        for (task, outcome) in announcements {
            counter!("orchestrator_tasks_timed_out_total").increment(1);
            self.announce_failure(&task, outcome);
        }
        count
    }

    /// 清理超过保留期的终态任务
    pub async fn purge_expired(&self) -> usize {
        let now = self.time.now();
        let retention = self.config.retention_hours as f64 * 3600.0;
        let mut state = self.state.write().await;
        let expired: Vec<TaskId> = state
            .tasks
            .values()
            .filter(|task| task.is_terminal())
            .filter(|task| {
                task.completed_at
                    .is_some_and(|completed| seconds_between(completed, now) > retention)
            })
            .map(|task| task.id.clone())
            .collect();

        for id in &expired {
            state.tasks.remove(id);
        }
        if !expired.is_empty() {
            info!("清理了 {} 个过期任务", expired.len());
        }
        expired.len()
    }

    pub async fn stats(&self) -> QueueStats {
        let now = self.time.now();
        let window = self.config.throughput_window_seconds as f64;
        let mut state = self.state.write().await;
        while state
            .recent_completions
            .front()
            .is_some_and(|completed| seconds_between(*completed, now) > window)
        {
            state.recent_completions.pop_front();
        }
        let mut task_type_distribution = HashMap::new();
        for key in &state.pending {
            if let Some(task) = state.tasks.get(&key.id) {
                *task_type_distribution.entry(task.task_type).or_insert(0) += 1;
            }
        }
        let counters = &state.counters;
        let average = |total: f64, samples: u64| {
            if samples == 0 {
                0.0
            } else {
                total / samples as f64
            }
        };

        QueueStats {
            total_tasks: state.tasks.len(),
            pending_tasks: state.pending.len(),
            running_tasks: state.running.len(),
            submitted_tasks: counters.submitted,
            completed_tasks: counters.completed,
            failed_tasks: counters.failed,
            cancelled_tasks: counters.cancelled,
            timed_out_tasks: counters.timed_out,
            retried_tasks: counters.retried,
            average_wait_time: average(counters.total_wait_time, counters.wait_samples),
            average_processing_time: average(
                counters.total_processing_time,
                counters.processing_samples,
            ),
            throughput_per_minute: state.recent_completions.len() as f64 / (window / 60.0),
            task_type_distribution,
            worker_utilization: state.worker_utilization.clone(),
            queue_capacity_used: state.tasks.len() as f64 / self.config.max_queue_size as f64,
        }
    }

    /// 检查队列健康状况并输出告警日志
    pub async fn monitor(&self) -> QueueStats {
        let stats = self.stats().await;
        let backlog_limit = self.config.max_queue_size as f64 * self.config.backlog_warning_ratio;
        if stats.pending_tasks as f64 > backlog_limit {
            warn!(
                "待处理任务积压: {} (容量 {})",
                stats.pending_tasks, self.config.max_queue_size
            );
        }
        let terminal_failures = stats.failed_tasks + stats.timed_out_tasks;
        if stats.completed_tasks > 0
            && terminal_failures as f64
                > stats.completed_tasks as f64 * self.config.failure_warning_ratio
        {
            warn!(
                "任务失败率过高: 失败 {} / 完成 {}",
                terminal_failures, stats.completed_tasks
            );
        }
        debug!(
            pending = stats.pending_tasks,
            running = stats.running_tasks,
            throughput = stats.throughput_per_minute,
            "队列状态"
        );
        stats
    }

    /// 启动超时扫描、监控和清理后台任务
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        info!("Starting task queue with config: {:?}", self.config);

        let queue = Arc::clone(self);
        let timeouts = spawn_periodic(
            "queue_timeout_sweep",
            Duration::from_secs(self.config.timeout_check_interval_seconds),
            shutdown.subscribe(),
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    queue.sweep_timeouts().await;
                }
            },
        );

        let queue = Arc::clone(self);
        let monitor = spawn_periodic(
            "queue_monitor",
            Duration::from_secs(self.config.monitor_interval_seconds),
            shutdown.subscribe(),
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    queue.monitor().await;
                }
            },
        );

        let queue = Arc::clone(self);
        let cleanup = spawn_periodic(
            "queue_cleanup",
            Duration::from_secs(self.config.cleanup_interval_seconds),
            shutdown.subscribe(),
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    queue.purge_expired().await;
                }
            },
        );

        vec![timeouts, monitor, cleanup]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::TaskPriority;
    use orchestrator_core::ManualTimeProvider;
    use serde_json::json;

    fn queue_with_clock(max_queue_size: usize) -> (TaskQueue, ManualTimeProvider) {
        let clock = ManualTimeProvider::new();
        let config = QueueConfig {
            max_queue_size,
            ..QueueConfig::default()
        };
        (TaskQueue::new(config, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_rejects_empty_content() {
        let (queue, _) = queue_with_clock(10);
        let err = queue
            .submit(TaskSubmission::new(TaskType::DataAnalysis, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_backoff_hides_task_until_delay_passes() {
        let (queue, clock) = queue_with_clock(10);
        let id = queue
            .submit(TaskSubmission::new(TaskType::Forecasting, "cpi").with_max_retries(1))
            .await
            .unwrap();

        queue.next_for("w1", &[]).await.unwrap();
        assert!(queue.fail(&id, "boom", true).await);
        assert!(queue.next_for("w1", &[]).await.is_none());

        clock.advance_secs_f64(2.5);
        let task = queue.next_for("w1", &[]).await.unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn test_complete_invalid_from_queued() {
        let (queue, _) = queue_with_clock(10);
        let id = queue
            .submit(TaskSubmission::new(TaskType::DataAnalysis, "gdp"))
            .await
            .unwrap();
        assert!(!queue.complete(&id, json!({})).await);
        assert_eq!(queue.status(&id).await.unwrap().status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn test_purge_expired_terminal_tasks() {
        let (queue, clock) = queue_with_clock(10);
        let done = queue
            .submit(TaskSubmission::new(TaskType::DataAnalysis, "a"))
            .await
            .unwrap();
        let waiting = queue
            .submit(TaskSubmission::new(TaskType::DataAnalysis, "b").with_priority(TaskPriority::Low))
            .await
            .unwrap();
        let task = queue.next_for("w1", &[]).await.unwrap();
        assert_eq!(task.id, done);
        queue.complete(&done, json!({"ok": true})).await;

        clock.advance(ChronoDuration::hours(25));
        assert_eq!(queue.purge_expired().await, 1);
        assert!(queue.status(&done).await.is_none());
        assert!(queue.status(&waiting).await.is_some());
    }
}
