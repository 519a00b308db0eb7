use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 内存类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    SystemRam,
    AcceleratorMemory,
    ModelWeights,
    InferenceCache,
    DataCache,
    Temporary,
}

impl MemoryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryClass::SystemRam => "system_ram",
            MemoryClass::AcceleratorMemory => "accelerator_memory",
            MemoryClass::ModelWeights => "model_weights",
            MemoryClass::InferenceCache => "inference_cache",
            MemoryClass::DataCache => "data_cache",
            MemoryClass::Temporary => "temporary",
        }
    }

    /// 拥有固定预算池的类别
    pub fn is_pooled(&self) -> bool {
        matches!(
            self,
            MemoryClass::ModelWeights | MemoryClass::DataCache | MemoryClass::Temporary
        )
    }
}

impl fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 内存优先级，数值越大越容易被回收
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Disposable = 4,
}

impl MemoryPriority {
    pub fn is_low(&self) -> bool {
        matches!(self, MemoryPriority::Low | MemoryPriority::Disposable)
    }
}

impl Default for MemoryPriority {
    fn default() -> Self {
        MemoryPriority::Normal
    }
}

/// 已记账的内存区域
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAllocation {
    pub id: String,
    pub class: MemoryClass,
    pub size_bytes: u64,
    pub priority: MemoryPriority,
    pub owner: String,
    pub pinned: bool,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl MemoryAllocation {
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed = now;
        self.access_count += 1;
    }

    pub fn idle_seconds(&self, now: DateTime<Utc>) -> f64 {
        crate::time::seconds_between(self.last_accessed, now)
    }
}

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn gib_to_bytes(gib: f64) -> u64 {
    if gib <= 0.0 {
        return 0;
    }
    (gib * GIB as f64) as u64
}
