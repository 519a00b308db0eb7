//! 推理后端接口定义
//!
//! Worker 通过 [`InferenceBackend`] 调用外部的模型推理服务。编排引擎把它当作
//! 一个不透明的、可能很慢、可能失败的函数：不感知后端协议，只关心返回的结果
//! 或错误。
//!
//! ## 使用示例
//!
//! ```rust
//! use async_trait::async_trait;
//! use orchestrator_core::models::Task;
//! use orchestrator_core::traits::InferenceBackend;
//! use orchestrator_core::OrchestratorResult;
//!
//! pub struct EchoBackend;
//!
//! #[async_trait]
//! impl InferenceBackend for EchoBackend {
//!     async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value> {
//!         Ok(serde_json::json!({ "echo": task.content }))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::OrchestratorResult;
use crate::models::Task;

#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// 执行任务
    ///
    /// 失败时返回 `TaskExecution`（进入重试流程）或其他不可重试错误。
    /// 调用不会被超时检查中断，超时由任务队列的周期扫描发现。
    async fn execute(&self, task: &Task) -> OrchestratorResult<Value>;

    /// Worker 加载时调用，用于预热模型
    async fn warm_up(&self) -> OrchestratorResult<()> {
        Ok(())
    }

    /// Worker 卸载时调用
    async fn shutdown(&self) -> OrchestratorResult<()> {
        Ok(())
    }

    /// 健康探测，返回探测耗时
    async fn probe(&self) -> OrchestratorResult<Duration> {
        Ok(Duration::ZERO)
    }

    fn name(&self) -> &str;
}
