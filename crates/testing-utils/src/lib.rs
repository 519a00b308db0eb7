//! # Orchestrator Testing Utils
//!
//! 工作区共享的测试工具：
//!
//! - **Builders**: `TaskSubmissionBuilder`、`WorkerSpecBuilder`、`WorkerSnapshotBuilder`
//! - **Mocks**: 可编排结果的 `MockBackend` 与内存中的 `StaticDirectory`
//! - **Helpers**: 测试配置、测试日志和异步等待
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
