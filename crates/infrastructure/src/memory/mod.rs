pub mod cache;
pub mod manager;
pub mod pool;
pub mod pressure;
pub mod probe;

pub use cache::{CacheEntry, CacheStats, CacheValue};
pub use manager::{CleanupReport, ManagedStats, MemoryManager, MemoryStats, UsageStats};
pub use pool::{MemoryPool, PoolStats};
pub use pressure::{PressureLevel, ResourcePressureEvent};
pub use probe::{ProcMeminfoProbe, StaticMemoryProbe, SystemMemoryProbe, SystemMemorySample};
