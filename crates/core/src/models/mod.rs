pub mod capability;
pub mod memory;
pub mod task;
pub mod worker;

pub use capability::{CapabilityMatrix, DEFAULT_CAPABILITY_SCORE};
pub use memory::{gib_to_bytes, MemoryAllocation, MemoryClass, MemoryPriority, GIB};
pub use task::{
    Task, TaskCallback, TaskId, TaskPriority, TaskStatus, TaskStatusInfo, TaskSubmission,
    TaskType, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECONDS,
};
pub use worker::{BackendKind, WorkerPriority, WorkerSnapshot, WorkerSpec, WorkerStatus};
