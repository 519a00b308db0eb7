use std::collections::HashMap;

use serde::Serialize;

use orchestrator_core::models::{MemoryAllocation, MemoryClass};

/// 固定预算的内存池
///
/// 池内分配总量永远不超过 `max_size_bytes`。
#[derive(Debug)]
pub struct MemoryPool {
    class: MemoryClass,
    max_size_bytes: u64,
    allocated_bytes: u64,
    allocations: HashMap<String, MemoryAllocation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub max_size_bytes: u64,
    pub allocated_bytes: u64,
    pub utilization: f64,
    pub allocation_count: usize,
}

impl MemoryPool {
    pub fn new(class: MemoryClass, max_size_bytes: u64) -> Self {
        Self {
            class,
            max_size_bytes,
            allocated_bytes: 0,
            allocations: HashMap::new(),
        }
    }

    pub fn class(&self) -> MemoryClass {
        self.class
    }

    pub fn available(&self) -> u64 {
        self.max_size_bytes.saturating_sub(self.allocated_bytes)
    }

    pub fn can_fit(&self, size_bytes: u64) -> bool {
        size_bytes <= self.available()
    }

    /// 空间不足时不修改任何状态并返回 false
    pub fn insert(&mut self, allocation: MemoryAllocation) -> bool {
        if !self.can_fit(allocation.size_bytes) {
            return false;
        }
        self.allocated_bytes += allocation.size_bytes;
        self.allocations.insert(allocation.id.clone(), allocation);
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<MemoryAllocation> {
        let allocation = self.allocations.remove(id)?;
        self.allocated_bytes -= allocation.size_bytes;
        Some(allocation)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut MemoryAllocation> {
        self.allocations.get_mut(id)
    }

    pub fn allocations(&self) -> impl Iterator<Item = &MemoryAllocation> {
        self.allocations.values()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn utilization(&self) -> f64 {
        if self.max_size_bytes == 0 {
            return 0.0;
        }
        self.allocated_bytes as f64 / self.max_size_bytes as f64
    }

    pub fn clear(&mut self) {
        self.allocations.clear();
        self.allocated_bytes = 0;
    }

    pub fn compact(&mut self) {
        self.allocations.shrink_to_fit();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_size_bytes: self.max_size_bytes,
            allocated_bytes: self.allocated_bytes,
            utilization: self.utilization(),
            allocation_count: self.allocations.len(),
        }
    }
}
