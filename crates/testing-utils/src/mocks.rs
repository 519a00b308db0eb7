//! Mock implementations of the engine's external seams

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use orchestrator_core::models::{Task, WorkerSnapshot};
use orchestrator_core::traits::{InferenceBackend, WorkerDirectory};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 一次调用的预设结果
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// 返回给定结果；`Value::Null` 表示返回默认的回显结果
    Succeed(Value),
    /// 可重试的执行错误
    Fail(String),
    /// 不可重试的错误
    FailPermanent(String),
}

/// Scripted inference backend
///
/// 依次消费预设结果，用完后返回默认结果。
pub struct MockBackend {
    name: String,
    script: Mutex<VecDeque<MockOutcome>>,
    default_outcome: MockOutcome,
    delay: Duration,
    probe_latency: Duration,
    fail_warm_up: bool,
    calls: AtomicUsize,
    executed: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            default_outcome: MockOutcome::Succeed(Value::Null),
            delay: Duration::ZERO,
            probe_latency: Duration::ZERO,
            fail_warm_up: false,
            calls: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcomes(self, outcomes: Vec<MockOutcome>) -> Self {
        *self.script.lock().unwrap_or_else(PoisonError::into_inner) = outcomes.into();
        self
    }

    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_probe_latency(mut self, latency: Duration) -> Self {
        self.probe_latency = latency;
        self
    }

    pub fn failing_warm_up(mut self) -> Self {
        self.fail_warm_up = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已执行过的任务ID（按调用顺序）
    pub fn executed_tasks(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn execute(&self, task: &Task) -> OrchestratorResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.id.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.next_outcome() {
            MockOutcome::Succeed(Value::Null) => Ok(json!({
                "worker": self.name,
                "task_id": task.id,
                "content": task.content,
            })),
            MockOutcome::Succeed(value) => Ok(value),
            MockOutcome::Fail(message) => Err(OrchestratorError::execution_error(message)),
            MockOutcome::FailPermanent(message) => Err(OrchestratorError::validation_error(message)),
        }
    }

    async fn warm_up(&self) -> OrchestratorResult<()> {
        if self.fail_warm_up {
            return Err(OrchestratorError::execution_error(format!(
                "{} warm up failed",
                self.name
            )));
        }
        Ok(())
    }

    async fn probe(&self) -> OrchestratorResult<Duration> {
        Ok(self.probe_latency)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// In-memory worker directory with real slot accounting
pub struct StaticDirectory {
    workers: tokio::sync::Mutex<Vec<WorkerSnapshot>>,
}

impl StaticDirectory {
    pub fn new(workers: Vec<WorkerSnapshot>) -> Self {
        Self {
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    pub async fn set_workers(&self, workers: Vec<WorkerSnapshot>) {
        *self.workers.lock().await = workers;
    }

    pub async fn worker(&self, name: &str) -> Option<WorkerSnapshot> {
        self.workers
            .lock()
            .await
            .iter()
            .find(|worker| worker.name == name)
            .cloned()
    }
}

#[async_trait]
impl WorkerDirectory for StaticDirectory {
    async fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.workers.lock().await.clone()
    }

    async fn acquire(&self, name: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.iter_mut().find(|worker| worker.name == name) {
            Some(worker) if worker.is_eligible() => {
                worker.current_requests += 1;
                true
            }
            _ => false,
        }
    }

    async fn release(&self, name: &str, response_time: f64, success: bool) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.iter_mut().find(|worker| worker.name == name) {
            worker.current_requests = worker.current_requests.saturating_sub(1);
            worker.total_requests += 1;
            if !success {
                worker.error_count += 1;
            }
            let total = worker.total_requests as f64;
            worker.average_response_time =
                (worker.average_response_time * (total - 1.0) + response_time) / total;
        }
    }

    async fn cancel_reservation(&self, name: &str) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.iter_mut().find(|worker| worker.name == name) {
            worker.current_requests = worker.current_requests.saturating_sub(1);
        }
    }
}
