use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::{TaskPriority, TaskType};

/// Worker优先级类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPriority {
    High,
    Medium,
    Low,
}

impl From<TaskPriority> for WorkerPriority {
    fn from(priority: TaskPriority) -> Self {
        match priority {
            TaskPriority::Critical | TaskPriority::High => WorkerPriority::High,
            TaskPriority::Normal => WorkerPriority::Medium,
            TaskPriority::Low | TaskPriority::Batch => WorkerPriority::Low,
        }
    }
}

/// Worker生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Unloaded,
    Loading,
    Ready,
    Busy,
    Error,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerStatus::Unloaded => "unloaded",
            WorkerStatus::Loading => "loading",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 推理后端类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendKind {
    Http {
        endpoint: String,
        #[serde(default = "default_request_timeout")]
        request_timeout_seconds: u64,
    },
    Simulated {
        #[serde(default = "default_simulated_latency")]
        latency_ms: u64,
        #[serde(default)]
        failure_rate: f64,
    },
}

fn default_request_timeout() -> u64 {
    300
}

fn default_simulated_latency() -> u64 {
    200
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Simulated {
            latency_ms: default_simulated_latency(),
            failure_rate: 0.0,
        }
    }
}

/// Worker目录配置项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    #[serde(default)]
    pub model_path: String,
    pub priority: WorkerPriority,
    /// 加速器显存需求（GiB）
    #[serde(default)]
    pub gpu_memory_gb: f64,
    /// 内存需求（GiB）
    #[serde(default)]
    pub ram_memory_gb: f64,
    pub max_concurrent_requests: u32,
    #[serde(default)]
    pub specialized_domains: Vec<String>,
    /// 为空表示支持全部任务类型
    #[serde(default)]
    pub supported_task_types: Vec<TaskType>,
    /// 任务类型 -> 能力评分，键为任务类型名称，加载配置时校验
    #[serde(default)]
    pub capabilities: BTreeMap<String, f64>,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_context_length")]
    pub context_length: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_context_length() -> u32 {
    8192
}

fn default_temperature() -> f64 {
    0.7
}

impl WorkerSpec {
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.supported_task_types.is_empty() || self.supported_task_types.contains(&task_type)
    }

    pub fn has_domain(&self, task_type: TaskType) -> bool {
        self.specialized_domains
            .iter()
            .any(|domain| domain == task_type.as_str())
    }
}

/// Worker运行时视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub name: String,
    pub status: WorkerStatus,
    pub priority: WorkerPriority,
    pub capacity: u32,
    pub current_requests: u32,
    pub total_requests: u64,
    pub error_count: u64,
    pub average_response_time: f64,
    pub health_score: f64,
    pub last_used: Option<DateTime<Utc>>,
    pub specialized_domains: Vec<String>,
    pub supported_task_types: Vec<TaskType>,
}

impl WorkerSnapshot {
    /// READY 且仍有空闲并发槽位
    pub fn is_eligible(&self) -> bool {
        self.status == WorkerStatus::Ready && self.current_requests < self.capacity
    }

    pub fn supports(&self, task_type: TaskType) -> bool {
        self.supported_task_types.is_empty() || self.supported_task_types.contains(&task_type)
    }

    pub fn has_domain(&self, task_type: TaskType) -> bool {
        self.specialized_domains
            .iter()
            .any(|domain| domain == task_type.as_str())
    }

    pub fn load_ratio(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.current_requests as f64 / self.capacity as f64
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.error_count as f64 / self.total_requests as f64
    }
}
