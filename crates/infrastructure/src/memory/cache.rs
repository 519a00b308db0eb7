//! 带TTL和LRU淘汰的类型化缓存

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use orchestrator_core::models::MemoryPriority;
use orchestrator_core::time::{seconds_between, Timestamp};

pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// 缓存条目，背后对应数据缓存池中的一块分配
pub struct CacheEntry {
    pub value: CacheValue,
    pub size_bytes: u64,
    pub ttl_seconds: u64,
    pub priority: MemoryPriority,
    pub allocation_id: String,
    pub pinned: bool,
    pub cached_at: Timestamp,
    pub last_accessed: Timestamp,
    pub access_count: u64,
}

impl CacheEntry {
    /// 存活时间超过TTL即过期
    pub fn is_expired(&self, now: Timestamp) -> bool {
        seconds_between(self.cached_at, now) > self.ttl_seconds as f64
    }
}

/// Cache hit/miss statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
pub(crate) struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl CacheStore {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn insert(&mut self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    /// 最久未访问的非固定条目
    pub fn lru_unpinned(&self) -> Option<String> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.pinned)
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())
    }

    pub fn drain_matching<F>(&mut self, mut predicate: F) -> Vec<CacheEntry>
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();
        keys.iter()
            .filter_map(|key| self.entries.remove(key))
            .collect()
    }

    pub fn drain_all(&mut self) -> Vec<CacheEntry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    pub fn compact(&mut self) {
        self.entries.shrink_to_fit();
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn entry(last_accessed: Timestamp, pinned: bool) -> CacheEntry {
        CacheEntry {
            value: Arc::new(1u32),
            size_bytes: 4,
            ttl_seconds: 10,
            priority: MemoryPriority::Normal,
            allocation_id: "a".to_string(),
            pinned,
            cached_at: last_accessed,
            last_accessed,
            access_count: 0,
        }
    }

    #[test]
    fn test_lru_skips_pinned_entries() {
        let now = Utc::now();
        let mut store = CacheStore::default();
        store.insert("oldest".to_string(), entry(now - Duration::seconds(30), true));
        store.insert("older".to_string(), entry(now - Duration::seconds(20), false));
        store.insert("newest".to_string(), entry(now, false));

        assert_eq!(store.lru_unpinned().as_deref(), Some("older"));
    }

    #[test]
    fn test_expiry_and_hit_rate() {
        let now = Utc::now();
        let cached = entry(now, false);
        assert!(!cached.is_expired(now + Duration::seconds(10)));
        assert!(cached.is_expired(now + Duration::milliseconds(10_100)));

        let mut store = CacheStore::default();
        store.record_hit();
        store.record_hit();
        store.record_hit();
        store.record_miss();
        assert_eq!(store.stats().hit_rate, 0.75);
    }
}
