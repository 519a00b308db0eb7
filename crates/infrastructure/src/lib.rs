pub mod memory;

pub use memory::{
    CleanupReport, MemoryManager, MemoryStats, PressureLevel, ProcMeminfoProbe,
    ResourcePressureEvent, StaticMemoryProbe, SystemMemoryProbe,
};
