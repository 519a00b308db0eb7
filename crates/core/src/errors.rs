use thiserror::Error;

use crate::models::MemoryClass;

/// 编排引擎错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("任务队列已满: 最大容量 {max_size}")]
    QueueFull { max_size: usize },

    #[error("没有可用的Worker: {0}")]
    WorkerUnavailable(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务执行超时: {task_id} (超时时间 {timeout_seconds}s)")]
    TaskTimeout { task_id: String, timeout_seconds: u64 },

    #[error("内存不足: 请求 {requested} 字节 ({class})")]
    MemoryExhausted { requested: u64, class: MemoryClass },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("Worker未找到: {name}")]
    WorkerNotFound { name: String },

    #[error("无效的状态转换: {0}")]
    InvalidState(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn task_not_found<S: Into<String>>(id: S) -> Self {
        Self::TaskNotFound { id: id.into() }
    }

    pub fn worker_not_found<S: Into<String>>(name: S) -> Self {
        Self::WorkerNotFound { name: name.into() }
    }

    pub fn execution_error<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }

    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 是否应当进入重试/退避流程
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::TaskExecution(_)
                | OrchestratorError::TaskTimeout { .. }
                | OrchestratorError::WorkerUnavailable(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Internal(_) | OrchestratorError::Configuration(_)
        )
    }

    pub fn user_message(&self) -> &str {
        match self {
            OrchestratorError::Validation(_) => "输入数据验证失败",
            OrchestratorError::QueueFull { .. } => "任务队列已满，请稍后重试",
            OrchestratorError::TaskNotFound { .. } => "请求的任务不存在",
            OrchestratorError::WorkerNotFound { .. } => "请求的Worker不存在",
            OrchestratorError::MemoryExhausted { .. } => "系统资源不足，请稍后重试",
            OrchestratorError::TaskTimeout { .. } => "任务执行超时",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
