use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::errors::OrchestratorError;

pub type TaskId = String;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    HypothesisGeneration,
    DataAnalysis,
    Verification,
    PolicyAnalysis,
    Forecasting,
    ResearchSynthesis,
    ReportGeneration,
    DataEnrichment,
    AnomalyDetection,
    MonteCarlo,
    CellularAutomata,
}

impl TaskType {
    pub const ALL: [TaskType; 11] = [
        TaskType::HypothesisGeneration,
        TaskType::DataAnalysis,
        TaskType::Verification,
        TaskType::PolicyAnalysis,
        TaskType::Forecasting,
        TaskType::ResearchSynthesis,
        TaskType::ReportGeneration,
        TaskType::DataEnrichment,
        TaskType::AnomalyDetection,
        TaskType::MonteCarlo,
        TaskType::CellularAutomata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::HypothesisGeneration => "hypothesis_generation",
            TaskType::DataAnalysis => "data_analysis",
            TaskType::Verification => "verification",
            TaskType::PolicyAnalysis => "policy_analysis",
            TaskType::Forecasting => "forecasting",
            TaskType::ResearchSynthesis => "research_synthesis",
            TaskType::ReportGeneration => "report_generation",
            TaskType::DataEnrichment => "data_enrichment",
            TaskType::AnomalyDetection => "anomaly_detection",
            TaskType::MonteCarlo => "monte_carlo",
            TaskType::CellularAutomata => "cellular_automata",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OrchestratorError::validation_error(format!("未知的任务类型: {s}")))
    }
}

/// 任务优先级，数值越小越紧急
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Batch = 4,
}

impl TaskPriority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Timeout
        )
    }

    /// 已分配给Worker（ASSIGNED或RUNNING）
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务完成回调
pub type TaskCallback = Arc<dyn Fn(&Task) + Send + Sync>;

/// 可调度的工作单元
#[derive(Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub content: String,
    pub context: Map<String, Value>,
    pub preferred_worker: Option<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub timeout_seconds: u64,
    /// 重试时会被推迟到退避结束的时间点
    pub created_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
    #[serde(skip)]
    pub callback: Option<TaskCallback>,
}

impl Task {
    pub fn new(submission: TaskSubmission, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: submission.task_type,
            priority: submission.priority,
            content: submission.content,
            context: submission.context,
            preferred_worker: submission.preferred_worker,
            max_retries: submission.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            retry_count: 0,
            timeout_seconds: submission.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            created_at: now,
            submitted_at: now,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            status: TaskStatus::Pending,
            assigned_worker: None,
            result: None,
            error: None,
            callback: submission.callback,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 排队等待时间（秒）
    pub fn wait_time(&self) -> Option<f64> {
        self.assigned_at
            .map(|assigned| crate::time::seconds_between(self.created_at, assigned))
    }

    /// 处理时间（秒）
    pub fn processing_time(&self) -> Option<f64> {
        match (self.started_at.or(self.assigned_at), self.completed_at) {
            (Some(start), Some(end)) => Some(crate::time::seconds_between(start, end)),
            _ => None,
        }
    }

    pub fn status_info(&self) -> TaskStatusInfo {
        TaskStatusInfo {
            id: self.id.clone(),
            task_type: self.task_type,
            priority: self.priority,
            status: self.status,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            assigned_at: self.assigned_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            assigned_worker: self.assigned_worker.clone(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            wait_time: self.wait_time(),
            processing_time: self.processing_time(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .field("assigned_worker", &self.assigned_worker)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// 任务提交参数
#[derive(Clone)]
pub struct TaskSubmission {
    pub task_type: TaskType,
    pub content: String,
    pub priority: TaskPriority,
    pub context: Map<String, Value>,
    pub preferred_worker: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub callback: Option<TaskCallback>,
}

impl TaskSubmission {
    pub fn new(task_type: TaskType, content: impl Into<String>) -> Self {
        Self {
            task_type,
            content: content.into(),
            priority: TaskPriority::Normal,
            context: Map::new(),
            preferred_worker: None,
            timeout_seconds: None,
            max_retries: None,
            callback: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_context_value(mut self, key: &str, value: Value) -> Self {
        self.context.insert(key.to_string(), value);
        self
    }

    pub fn with_preferred_worker(mut self, worker: impl Into<String>) -> Self {
        self.preferred_worker = Some(worker.into());
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = Some(timeout_seconds);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_callback(mut self, callback: TaskCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for TaskSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSubmission")
            .field("task_type", &self.task_type)
            .field("priority", &self.priority)
            .field("preferred_worker", &self.preferred_worker)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// 任务状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusInfo {
    pub id: TaskId,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_worker: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub wait_time: Option<f64>,
    pub processing_time: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}
