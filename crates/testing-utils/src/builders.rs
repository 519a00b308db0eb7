//! Test data builders
//!
//! 带有合理默认值的构建器，测试只需覆盖关心的字段。

use std::collections::BTreeMap;

use serde_json::Value;

use orchestrator_core::models::{
    BackendKind, TaskPriority, TaskSubmission, TaskType, WorkerPriority, WorkerSnapshot,
    WorkerSpec, WorkerStatus,
};

/// Builder for task submissions
pub struct TaskSubmissionBuilder {
    submission: TaskSubmission,
}

impl TaskSubmissionBuilder {
    pub fn new() -> Self {
        Self {
            submission: TaskSubmission::new(TaskType::DataAnalysis, "test content"),
        }
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.submission.task_type = task_type;
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.submission.content = content.to_string();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.submission.priority = priority;
        self
    }

    pub fn with_preferred_worker(mut self, worker: &str) -> Self {
        self.submission.preferred_worker = Some(worker.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.submission.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.submission.max_retries = Some(max_retries);
        self
    }

    pub fn with_context_value(mut self, key: &str, value: Value) -> Self {
        self.submission.context.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> TaskSubmission {
        self.submission
    }
}

impl Default for TaskSubmissionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for worker catalog entries
///
/// 默认是一个无资源需求、容量为1、零延迟的模拟Worker。
pub struct WorkerSpecBuilder {
    spec: WorkerSpec,
}

impl WorkerSpecBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: WorkerSpec {
                name: name.to_string(),
                model_path: format!("models/{name}"),
                priority: WorkerPriority::Medium,
                gpu_memory_gb: 0.0,
                ram_memory_gb: 0.0,
                max_concurrent_requests: 1,
                specialized_domains: vec![],
                supported_task_types: vec![],
                capabilities: BTreeMap::new(),
                backend: BackendKind::Simulated {
                    latency_ms: 0,
                    failure_rate: 0.0,
                },
                context_length: 4096,
                temperature: 0.7,
            },
        }
    }

    pub fn with_priority(mut self, priority: WorkerPriority) -> Self {
        self.spec.priority = priority;
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.spec.max_concurrent_requests = capacity;
        self
    }

    pub fn with_gpu_memory_gb(mut self, gib: f64) -> Self {
        self.spec.gpu_memory_gb = gib;
        self
    }

    pub fn with_ram_memory_gb(mut self, gib: f64) -> Self {
        self.spec.ram_memory_gb = gib;
        self
    }

    pub fn with_domains(mut self, domains: &[TaskType]) -> Self {
        self.spec.specialized_domains = domains.iter().map(|d| d.as_str().to_string()).collect();
        self
    }

    pub fn with_supported_types(mut self, types: &[TaskType]) -> Self {
        self.spec.supported_task_types = types.to_vec();
        self
    }

    pub fn with_capability(mut self, task_type: TaskType, score: f64) -> Self {
        self.spec
            .capabilities
            .insert(task_type.as_str().to_string(), score);
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.spec.backend = backend;
        self
    }

    pub fn build(self) -> WorkerSpec {
        self.spec
    }
}

/// Builder for worker snapshots used by load balancer tests
pub struct WorkerSnapshotBuilder {
    snapshot: WorkerSnapshot,
}

impl WorkerSnapshotBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            snapshot: WorkerSnapshot {
                name: name.to_string(),
                status: WorkerStatus::Ready,
                priority: WorkerPriority::Medium,
                capacity: 1,
                current_requests: 0,
                total_requests: 0,
                error_count: 0,
                average_response_time: 0.0,
                health_score: 1.0,
                last_used: None,
                specialized_domains: vec![],
                supported_task_types: vec![],
            },
        }
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.snapshot.status = status;
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.snapshot.capacity = capacity;
        self
    }

    pub fn with_current_requests(mut self, current: u32) -> Self {
        self.snapshot.current_requests = current;
        self
    }

    pub fn with_health_score(mut self, health: f64) -> Self {
        self.snapshot.health_score = health;
        self
    }

    pub fn with_supported_types(mut self, types: &[TaskType]) -> Self {
        self.snapshot.supported_task_types = types.to_vec();
        self
    }

    pub fn build(self) -> WorkerSnapshot {
        self.snapshot
    }
}
