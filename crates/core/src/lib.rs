pub mod background;
pub mod errors;
pub mod logging;
pub mod models;
pub mod time;
pub mod traits;

pub use background::spawn_periodic;
pub use errors::*;
pub use logging::{init_logging, LogFormat};
pub use models::{
    CapabilityMatrix, MemoryAllocation, MemoryClass, MemoryPriority, Task, TaskId, TaskPriority,
    TaskStatus, TaskStatusInfo, TaskSubmission, TaskType, WorkerPriority, WorkerSnapshot,
    WorkerSpec, WorkerStatus,
};
pub use time::{ManualTimeProvider, SharedTimeProvider, SystemTimeProvider, TimeProvider, Timestamp};
pub use traits::{InferenceBackend, WorkerDirectory};
