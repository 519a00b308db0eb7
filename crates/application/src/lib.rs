//! 分析协调层
//!
//! [`Coordinator`] 接收分析请求并跟踪其生命周期，[`OrchestrationEngine`]
//! 负责构建和启动全部组件。

pub mod analysis;
pub mod coordinator;
pub mod engine;
pub mod framing;

pub use analysis::{
    consensus_confidence, consensus_ratio, AnalysisKind, AnalysisRequest, AnalysisResult,
    AnalysisStatus, CoordinatorSummary, HealthAlert, PerformanceCounters, SystemPerformance,
};
pub use coordinator::Coordinator;
pub use engine::OrchestrationEngine;
pub use framing::{policy_type, AnalysisFraming};
