use serde::Serialize;

use orchestrator_core::models::{TaskId, TaskType};

/// 任务队列状态变更事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Submitted {
        task_id: TaskId,
        task_type: TaskType,
    },
    Assigned {
        task_id: TaskId,
        worker: String,
    },
    Completed {
        task_id: TaskId,
        worker: Option<String>,
    },
    Failed {
        task_id: TaskId,
        error: String,
    },
    Retried {
        task_id: TaskId,
        retry_count: u32,
        backoff_seconds: u64,
    },
    Cancelled {
        task_id: TaskId,
    },
    TimedOut {
        task_id: TaskId,
    },
}

impl QueueEvent {
    pub fn task_id(&self) -> &str {
        match self {
            QueueEvent::Submitted { task_id, .. }
            | QueueEvent::Assigned { task_id, .. }
            | QueueEvent::Completed { task_id, .. }
            | QueueEvent::Failed { task_id, .. }
            | QueueEvent::Retried { task_id, .. }
            | QueueEvent::Cancelled { task_id }
            | QueueEvent::TimedOut { task_id } => task_id,
        }
    }

    /// 任务是否已进入终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueEvent::Completed { .. }
                | QueueEvent::Failed { .. }
                | QueueEvent::Cancelled { .. }
                | QueueEvent::TimedOut { .. }
        )
    }
}
