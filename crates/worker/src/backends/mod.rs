//! 推理后端实现

mod http;
mod simulated;

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::models::{BackendKind, WorkerSpec};
use orchestrator_core::traits::InferenceBackend;
use orchestrator_core::OrchestratorResult;

pub use http::HttpBackend;
pub use simulated::SimulatedBackend;

/// 根据Worker配置创建推理后端
pub fn build_backend(spec: &WorkerSpec) -> OrchestratorResult<Arc<dyn InferenceBackend>> {
    match &spec.backend {
        BackendKind::Http {
            endpoint,
            request_timeout_seconds,
        } => Ok(Arc::new(HttpBackend::new(
            spec,
            endpoint,
            Duration::from_secs(*request_timeout_seconds),
        )?)),
        BackendKind::Simulated {
            latency_ms,
            failure_rate,
        } => Ok(Arc::new(SimulatedBackend::new(
            &spec.name,
            Duration::from_millis(*latency_ms),
            *failure_rate,
        ))),
    }
}
