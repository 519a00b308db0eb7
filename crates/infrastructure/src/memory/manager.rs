use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use orchestrator_config::MemoryConfig;
use orchestrator_core::models::{gib_to_bytes, MemoryAllocation, MemoryClass, MemoryPriority};
use orchestrator_core::time::{SharedTimeProvider, Timestamp};
use orchestrator_core::{spawn_periodic, OrchestratorResult};

use super::cache::{CacheEntry, CacheStats, CacheStore, CacheValue};
use super::pool::{MemoryPool, PoolStats};
use super::pressure::{PressureLevel, ResourcePressureEvent};
use super::probe::{ProcMeminfoProbe, SystemMemoryProbe};

const CACHE_OWNER: &str = "cache";
const POOLED_CLASSES: [MemoryClass; 3] = [
    MemoryClass::ModelWeights,
    MemoryClass::DataCache,
    MemoryClass::Temporary,
];

/// 一次清理的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub aggressive: bool,
    pub cache_entries_removed: usize,
    pub allocations_freed: usize,
    pub bytes_freed: u64,
    pub gc_passes: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub utilization: f64,
}

impl UsageStats {
    fn from_budget(total_bytes: u64, used_bytes: u64) -> Self {
        Self {
            total_bytes,
            used_bytes,
            available_bytes: total_bytes.saturating_sub(used_bytes),
            utilization: ratio(used_bytes, total_bytes),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagedStats {
    pub allocations: usize,
    pub total_bytes: u64,
    pub average_allocation_bytes: f64,
}

/// 内存管理器统计快照
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub system: UsageStats,
    pub accelerator: UsageStats,
    pub managed: ManagedStats,
    pub cache: CacheStats,
    pub pools: BTreeMap<String, PoolStats>,
    pub gc_passes: u64,
    pub last_cleanup: Option<Timestamp>,
    pub pressure_level: PressureLevel,
}

fn ratio(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64
}

/// 分配表：固定预算池 + 直接记账的系统内存/加速器内存
struct AllocationTable {
    pools: HashMap<MemoryClass, MemoryPool>,
    direct: HashMap<String, MemoryAllocation>,
    gc_passes: u64,
    last_cleanup: Option<Timestamp>,
}

impl AllocationTable {
    fn direct_bytes(&self, class: MemoryClass) -> u64 {
        self.direct
            .values()
            .filter(|allocation| allocation.class == class)
            .map(|allocation| allocation.size_bytes)
            .sum()
    }

    fn pooled_bytes(&self) -> u64 {
        self.pools.values().map(MemoryPool::allocated_bytes).sum()
    }

    /// 计入系统RAM的字节数（池也从系统RAM中划分）
    fn ram_bytes(&self) -> u64 {
        self.direct_bytes(MemoryClass::SystemRam)
            + self.direct_bytes(MemoryClass::InferenceCache)
            + self.pooled_bytes()
    }

    fn free(&mut self, id: &str) -> Option<MemoryAllocation> {
        if let Some(allocation) = self.direct.remove(id) {
            return Some(allocation);
        }
        self.pools.values_mut().find_map(|pool| pool.remove(id))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut MemoryAllocation> {
        if self.direct.contains_key(id) {
            return self.direct.get_mut(id);
        }
        self.pools.values_mut().find_map(|pool| pool.get_mut(id))
    }

    fn all(&self) -> impl Iterator<Item = &MemoryAllocation> {
        self.direct
            .values()
            .chain(self.pools.values().flat_map(|pool| pool.allocations()))
    }

    fn max_pool_utilization(&self) -> f64 {
        self.pools
            .values()
            .map(MemoryPool::utilization)
            .fold(0.0, f64::max)
    }

    fn compact(&mut self) {
        self.direct.shrink_to_fit();
        for pool in self.pools.values_mut() {
            pool.compact();
        }
    }

    fn clear(&mut self) {
        self.direct.clear();
        for pool in self.pools.values_mut() {
            pool.clear();
        }
    }
}

/// 内存管理器
///
/// 负责内存池记账、TTL缓存以及资源压力监控。
/// 锁顺序固定为先缓存后分配表。
pub struct MemoryManager {
    config: MemoryConfig,
    probe: Option<Arc<dyn SystemMemoryProbe>>,
    time: SharedTimeProvider,
    cache: Mutex<CacheStore>,
    allocations: Mutex<AllocationTable>,
    pressure_level: Mutex<PressureLevel>,
    pressure_tx: broadcast::Sender<ResourcePressureEvent>,
}

impl MemoryManager {
    pub fn new(
        config: MemoryConfig,
        probe: Option<Arc<dyn SystemMemoryProbe>>,
        time: SharedTimeProvider,
    ) -> Self {
        let pools = POOLED_CLASSES
            .iter()
            .map(|&class| {
                let budget = match class {
                    MemoryClass::ModelWeights => config.model_weights_pool_gb,
                    MemoryClass::DataCache => config.data_cache_pool_gb,
                    _ => config.temporary_pool_gb,
                };
                (class, MemoryPool::new(class, gib_to_bytes(budget)))
            })
            .collect();
        let (pressure_tx, _) = broadcast::channel(config.pressure_channel_capacity.max(1));

        info!(
            "内存管理器初始化: RAM预算 {}GiB, 加速器预算 {}GiB",
            config.max_system_ram_gb, config.max_accelerator_gb
        );

        Self {
            config,
            probe,
            time,
            cache: Mutex::new(CacheStore::default()),
            allocations: Mutex::new(AllocationTable {
                pools,
                direct: HashMap::new(),
                gc_passes: 0,
                last_cleanup: None,
            }),
            pressure_level: Mutex::new(PressureLevel::Normal),
            pressure_tx,
        }
    }

    /// 根据配置决定是否使用 `/proc/meminfo`
    pub fn from_config(config: MemoryConfig, time: SharedTimeProvider) -> Self {
        let probe: Option<Arc<dyn SystemMemoryProbe>> = if config.use_system_probe {
            Some(Arc::new(ProcMeminfoProbe))
        } else {
            None
        };
        Self::new(config, probe, time)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn subscribe_pressure(&self) -> broadcast::Receiver<ResourcePressureEvent> {
        self.pressure_tx.subscribe()
    }

    fn ram_budget(&self) -> u64 {
        gib_to_bytes(self.config.max_system_ram_gb)
    }

    fn accelerator_budget(&self) -> u64 {
        gib_to_bytes(self.config.max_accelerator_gb)
    }

    fn headroom(&self, table: &AllocationTable, class: MemoryClass) -> u64 {
        if class.is_pooled() {
            return table.pools.get(&class).map_or(0, MemoryPool::available);
        }
        match class {
            MemoryClass::AcceleratorMemory => self
                .accelerator_budget()
                .saturating_sub(table.direct_bytes(MemoryClass::AcceleratorMemory)),
            _ => {
                let budget = self.ram_budget().saturating_sub(table.ram_bytes());
                match self.probe.as_ref().and_then(|probe| probe.sample()) {
                    Some(sample) => budget.min(sample.available_bytes),
                    None => budget,
                }
            }
        }
    }

    /// 当前可分配的字节数
    pub async fn available(&self, class: MemoryClass) -> u64 {
        let table = self.allocations.lock().await;
        self.headroom(&table, class)
    }

    fn allocate_locked(
        &self,
        table: &mut AllocationTable,
        size_bytes: u64,
        class: MemoryClass,
        owner: &str,
        priority: MemoryPriority,
        pinned: bool,
    ) -> Option<String> {
        if size_bytes > self.headroom(table, class) {
            counter!("memory_allocation_failures_total", "class" => class.as_str()).increment(1);
            debug!(
                "内存分配失败: 请求 {} 字节 ({}), 所有者 {}",
                size_bytes, class, owner
            );
            return None;
        }

        let now = self.time.now();
        let allocation = MemoryAllocation {
            id: format!("{}_{}_{}", owner, class, Uuid::new_v4().simple()),
            class,
            size_bytes,
            priority,
            owner: owner.to_string(),
            pinned,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        };
        let id = allocation.id.clone();

        if class.is_pooled() {
            let pool = table.pools.get_mut(&class)?;
            if !pool.insert(allocation) {
                return None;
            }
        } else {
            table.direct.insert(id.clone(), allocation);
        }
        Some(id)
    }

    /// 申请一块已记账的内存区域，空间不足时返回 None 且不修改任何状态
    pub async fn allocate(
        &self,
        size_bytes: u64,
        class: MemoryClass,
        owner: &str,
        priority: MemoryPriority,
        pinned: bool,
    ) -> Option<String> {
        let mut table = self.allocations.lock().await;
        let id = self.allocate_locked(&mut table, size_bytes, class, owner, priority, pinned)?;
        debug!("分配内存 {}: {} 字节 ({})", id, size_bytes, class);
        Some(id)
    }

    pub async fn deallocate(&self, id: &str) -> bool {
        let mut table = self.allocations.lock().await;
        match table.free(id) {
            Some(allocation) => {
                debug!("释放内存 {}: {} 字节", id, allocation.size_bytes);
                true
            }
            None => false,
        }
    }

    /// 更新分配的访问时间
    pub async fn touch(&self, id: &str) -> bool {
        let now = self.time.now();
        let mut table = self.allocations.lock().await;
        match table.get_mut(id) {
            Some(allocation) => {
                allocation.touch(now);
                true
            }
            None => false,
        }
    }

    pub async fn allocation(&self, id: &str) -> Option<MemoryAllocation> {
        let table = self.allocations.lock().await;
        let allocation = table.all().find(|allocation| allocation.id == id).cloned();
        allocation
    }

    async fn put_value(
        &self,
        key: String,
        value: CacheValue,
        size_bytes: u64,
        ttl_seconds: Option<u64>,
        priority: MemoryPriority,
    ) -> bool {
        let now = self.time.now();
        let mut cache = self.cache.lock().await;
        let mut table = self.allocations.lock().await;

        // 先确定要替换和淘汰的条目，容量不足时在修改缓存之前拒绝
        let replaced_bytes = cache.get(&key).map(|entry| entry.size_bytes);
        let victim = if replaced_bytes.is_none() && cache.len() >= self.config.max_cache_entries {
            match cache.lru_unpinned() {
                Some(victim) => Some(victim),
                None => {
                    warn!("缓存已满且所有条目均已固定，拒绝写入 {}", key);
                    return false;
                }
            }
        } else {
            None
        };
        let victim_bytes = victim
            .as_deref()
            .and_then(|victim| cache.get(victim))
            .map_or(0, |entry| entry.size_bytes);

        let reclaimable = replaced_bytes.unwrap_or(0) + victim_bytes;
        if size_bytes > self.headroom(&table, MemoryClass::DataCache) + reclaimable {
            counter!("memory_allocation_failures_total", "class" => MemoryClass::DataCache.as_str())
                .increment(1);
            warn!("数据缓存池空间不足，无法缓存 {} ({} 字节)", key, size_bytes);
            return false;
        }

        if let Some(previous) = cache.remove(&key) {
            table.free(&previous.allocation_id);
        }
        if let Some(victim) = victim {
            if let Some(evicted) = cache.remove(&victim) {
                table.free(&evicted.allocation_id);
                counter!("memory_cache_evictions_total").increment(1);
                debug!("缓存已满，淘汰条目 {}", victim);
            }
        }

        let Some(allocation_id) = self.allocate_locked(
            &mut table,
            size_bytes,
            MemoryClass::DataCache,
            CACHE_OWNER,
            priority,
            false,
        ) else {
            warn!("数据缓存池空间不足，无法缓存 {} ({} 字节)", key, size_bytes);
            return false;
        };

        cache.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                ttl_seconds: ttl_seconds.unwrap_or(self.config.cache_ttl_seconds),
                priority,
                allocation_id,
                pinned: false,
                cached_at: now,
                last_accessed: now,
                access_count: 0,
            },
        );
        true
    }

    /// 写入缓存，`size_bytes` 为调用方给出的值大小
    pub async fn put<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        size_bytes: u64,
        ttl_seconds: Option<u64>,
        priority: MemoryPriority,
    ) -> bool {
        self.put_value(key.into(), Arc::new(value), size_bytes, ttl_seconds, priority)
            .await
    }

    /// 以JSON形式缓存，大小按序列化后的长度计算
    pub async fn put_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl_seconds: Option<u64>,
        priority: MemoryPriority,
    ) -> OrchestratorResult<bool> {
        let encoded = serde_json::to_vec(value)?;
        let value: serde_json::Value = serde_json::from_slice(&encoded)?;
        Ok(self
            .put_value(
                key.into(),
                Arc::new(value),
                encoded.len() as u64,
                ttl_seconds,
                priority,
            )
            .await)
    }

    /// 读取缓存；不存在、已过期或类型不符都记为未命中
    pub async fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let now = self.time.now();
        let mut cache = self.cache.lock().await;

        let expired = match cache.get_mut(key) {
            None => {
                cache.record_miss();
                counter!("memory_cache_misses_total").increment(1);
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };

        if expired {
            if let Some(entry) = cache.remove(key) {
                self.allocations.lock().await.free(&entry.allocation_id);
            }
            cache.record_miss();
            counter!("memory_cache_misses_total").increment(1);
            debug!("缓存条目已过期: {}", key);
            return None;
        }

        let (value, allocation_id) = match cache.get_mut(key) {
            Some(entry) => match Arc::clone(&entry.value).downcast::<T>() {
                Ok(value) => {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    (value, entry.allocation_id.clone())
                }
                Err(_) => {
                    debug!("缓存条目 {} 类型不匹配", key);
                    cache.record_miss();
                    counter!("memory_cache_misses_total").increment(1);
                    return None;
                }
            },
            None => return None,
        };
        cache.record_hit();
        counter!("memory_cache_hits_total").increment(1);

        if let Some(allocation) = self.allocations.lock().await.get_mut(&allocation_id) {
            allocation.touch(now);
        }
        Some(value)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get::<serde_json::Value>(key).await?;
        match serde_json::from_value(value.as_ref().clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!("缓存条目 {} 反序列化失败: {}", key, e);
                None
            }
        }
    }

    /// 固定缓存条目，使其不参与LRU淘汰
    pub async fn pin(&self, key: &str) -> bool {
        let mut cache = self.cache.lock().await;
        match cache.get_mut(key) {
            Some(entry) => {
                entry.pinned = true;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, key: &str) -> bool {
        let mut cache = self.cache.lock().await;
        match cache.remove(key) {
            Some(entry) => {
                self.allocations.lock().await.free(&entry.allocation_id);
                true
            }
            None => false,
        }
    }

    /// 清除已过期的缓存条目
    pub async fn purge_expired_cache(&self) -> usize {
        let now = self.time.now();
        let mut cache = self.cache.lock().await;
        let removed = cache.drain_matching(|entry| entry.is_expired(now));
        if removed.is_empty() {
            return 0;
        }
        let mut table = self.allocations.lock().await;
        for entry in &removed {
            table.free(&entry.allocation_id);
        }
        debug!("清除 {} 个过期缓存条目", removed.len());
        removed.len()
    }

    /// 内存清理
    ///
    /// 普通清理：清除过期缓存，回收空闲的临时分配和低优先级分配，执行一次整理。
    /// 激进清理：另外清除全部低优先级缓存，将缓存收缩到上限的一半，执行三次整理，
    /// 并且不再跳过固定的分配。
    pub async fn cleanup(&self, aggressive: bool) -> CleanupReport {
        let now = self.time.now();
        let mut report = CleanupReport {
            aggressive,
            ..CleanupReport::default()
        };

        let mut cache = self.cache.lock().await;
        let mut removed = cache.drain_matching(|entry| {
            entry.is_expired(now) || (aggressive && entry.priority.is_low())
        });
        if aggressive {
            let target = self.config.max_cache_entries / 2;
            while cache.len() > target {
                let Some(victim) = cache.lru_unpinned() else {
                    break;
                };
                if let Some(entry) = cache.remove(&victim) {
                    removed.push(entry);
                }
            }
        }

        let mut table = self.allocations.lock().await;
        for entry in &removed {
            if let Some(allocation) = table.free(&entry.allocation_id) {
                report.bytes_freed += allocation.size_bytes;
            }
        }
        report.cache_entries_removed = removed.len();

        let temporary_idle = self.config.temporary_idle_seconds as f64;
        let low_priority_idle = self.config.low_priority_idle_seconds as f64;
        let reclaimable: Vec<String> = table
            .all()
            .filter(|allocation| allocation.owner != CACHE_OWNER)
            .filter(|allocation| aggressive || !allocation.pinned)
            .filter(|allocation| {
                let idle = allocation.idle_seconds(now);
                (allocation.class == MemoryClass::Temporary && idle > temporary_idle)
                    || (allocation.priority.is_low() && idle > low_priority_idle)
            })
            .map(|allocation| allocation.id.clone())
            .collect();
        for id in &reclaimable {
            if let Some(allocation) = table.free(id) {
                report.allocations_freed += 1;
                report.bytes_freed += allocation.size_bytes;
            }
        }

        report.gc_passes = if aggressive { 3 } else { 1 };
        for _ in 0..report.gc_passes {
            cache.compact();
            table.compact();
        }
        table.gc_passes += u64::from(report.gc_passes);
        table.last_cleanup = Some(now);
        drop(table);
        drop(cache);

        let mode = if aggressive { "aggressive" } else { "normal" };
        counter!("memory_cleanup_passes_total", "mode" => mode).increment(1);
        info!(
            "内存清理完成 ({}): 缓存条目 {}, 分配 {}, 释放 {} 字节",
            mode, report.cache_entries_removed, report.allocations_freed, report.bytes_freed
        );
        report
    }

    /// 清除全部缓存和分配
    pub async fn cleanup_all(&self) {
        let mut cache = self.cache.lock().await;
        cache.drain_all();
        let mut table = self.allocations.lock().await;
        table.clear();
        table.last_cleanup = Some(self.time.now());
        info!("已清除全部托管内存");
    }

    pub async fn shutdown(&self) {
        info!("内存管理器关闭");
        self.cleanup_all().await;
    }

    fn ram_utilization_locked(&self, table: &AllocationTable) -> f64 {
        match self.probe.as_ref().and_then(|probe| probe.sample()) {
            Some(sample) => sample.utilization(),
            None => ratio(table.ram_bytes(), self.ram_budget()),
        }
    }

    pub async fn ram_utilization(&self) -> f64 {
        let table = self.allocations.lock().await;
        self.ram_utilization_locked(&table)
    }

    pub async fn accelerator_utilization(&self) -> f64 {
        let table = self.allocations.lock().await;
        ratio(
            table.direct_bytes(MemoryClass::AcceleratorMemory),
            self.accelerator_budget(),
        )
    }

    /// 检查资源压力并执行相应清理
    ///
    /// 高于临界阈值时激进清理，高于普通阈值时普通清理。
    /// 压力状态或等级变化时广播 `ResourcePressureEvent`。
    pub async fn check_pressure(&self) -> ResourcePressureEvent {
        let (ram, accelerator, pool) = {
            let table = self.allocations.lock().await;
            (
                self.ram_utilization_locked(&table),
                ratio(
                    table.direct_bytes(MemoryClass::AcceleratorMemory),
                    self.accelerator_budget(),
                ),
                table.max_pool_utilization(),
            )
        };

        gauge!("memory_ram_utilization").set(ram);
        gauge!("memory_accelerator_utilization").set(accelerator);
        gauge!("memory_pool_max_utilization").set(pool);

        let critical = self.config.critical_threshold;
        let ram_over = ram > self.config.ram_pressure_threshold
            || pool > self.config.ram_pressure_threshold;
        let accelerator_over = accelerator > self.config.accelerator_pressure_threshold;
        let level = if ram > critical || pool > critical || accelerator > critical {
            PressureLevel::Critical
        } else if ram_over || accelerator_over {
            PressureLevel::Elevated
        } else {
            PressureLevel::Normal
        };

        match level {
            PressureLevel::Critical => {
                warn!(
                    "内存压力临界: RAM {:.1}%, 加速器 {:.1}%, 内存池 {:.1}%",
                    ram * 100.0,
                    accelerator * 100.0,
                    pool * 100.0
                );
                self.cleanup(true).await;
            }
            PressureLevel::Elevated => {
                if ram_over {
                    warn!("内存压力较高: RAM {:.1}%, 内存池 {:.1}%", ram * 100.0, pool * 100.0);
                    self.cleanup(false).await;
                }
                if accelerator_over {
                    warn!("加速器内存压力较高: {:.1}%", accelerator * 100.0);
                }
            }
            PressureLevel::Normal => {}
        }

        let previous = {
            let mut current = self.pressure_level.lock().await;
            std::mem::replace(&mut *current, level)
        };

        let event = ResourcePressureEvent {
            level,
            ram_utilization: ram,
            accelerator_utilization: accelerator,
            pool_utilization: pool,
            ram_over_threshold: ram_over,
            accelerator_over_threshold: accelerator_over,
            timestamp: self.time.now(),
        };
        if level != PressureLevel::Normal || previous != level {
            // 没有订阅者时发送失败可以忽略
            let _ = self.pressure_tx.send(event.clone());
        }
        event
    }

    pub async fn stats(&self) -> MemoryStats {
        let cache_stats = self.cache.lock().await.stats();
        let table = self.allocations.lock().await;

        let system = match self.probe.as_ref().and_then(|probe| probe.sample()) {
            Some(sample) => UsageStats {
                total_bytes: sample.total_bytes,
                used_bytes: sample.used_bytes(),
                available_bytes: sample.available_bytes,
                utilization: sample.utilization(),
            },
            None => UsageStats::from_budget(self.ram_budget(), table.ram_bytes()),
        };
        let accelerator = UsageStats::from_budget(
            self.accelerator_budget(),
            table.direct_bytes(MemoryClass::AcceleratorMemory),
        );

        let (count, total_bytes) = table
            .all()
            .fold((0usize, 0u64), |(count, bytes), allocation| {
                (count + 1, bytes + allocation.size_bytes)
            });
        let managed = ManagedStats {
            allocations: count,
            total_bytes,
            average_allocation_bytes: if count == 0 {
                0.0
            } else {
                total_bytes as f64 / count as f64
            },
        };

        let pools = table
            .pools
            .iter()
            .map(|(class, pool)| (class.as_str().to_string(), pool.stats()))
            .collect();

        MemoryStats {
            system,
            accelerator,
            managed,
            cache: cache_stats,
            pools,
            gc_passes: table.gc_passes,
            last_cleanup: table.last_cleanup,
            pressure_level: *self.pressure_level.lock().await,
        }
    }

    /// 启动压力监控和缓存清理后台任务
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let monitor = {
            let manager = Arc::clone(self);
            spawn_periodic(
                "memory_monitor",
                Duration::from_secs(self.config.monitor_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let manager = Arc::clone(&manager);
                    async move {
                        manager.check_pressure().await;
                    }
                },
            )
        };

        let cache_cleanup = {
            let manager = Arc::clone(self);
            spawn_periodic(
                "memory_cache_cleanup",
                Duration::from_secs(self.config.cache_cleanup_interval_seconds),
                shutdown.subscribe(),
                move || {
                    let manager = Arc::clone(&manager);
                    async move {
                        manager.purge_expired_cache().await;
                    }
                },
            )
        };

        vec![monitor, cache_cleanup]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::GIB;
    use orchestrator_core::ManualTimeProvider;

    fn manager() -> (MemoryManager, ManualTimeProvider) {
        let clock = ManualTimeProvider::new();
        let config = MemoryConfig {
            use_system_probe: false,
            ..MemoryConfig::default()
        };
        (MemoryManager::new(config, None, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_direct_accelerator_budget() {
        let (manager, _) = manager();
        let first = manager
            .allocate(40 * GIB, MemoryClass::AcceleratorMemory, "w1", MemoryPriority::High, true)
            .await;
        assert!(first.is_some());
        assert!(manager
            .allocate(21 * GIB, MemoryClass::AcceleratorMemory, "w2", MemoryPriority::High, true)
            .await
            .is_none());
        assert_eq!(
            manager.available(MemoryClass::AcceleratorMemory).await,
            20 * GIB
        );
        assert!(manager.deallocate(&first.unwrap()).await);
        assert_eq!(manager.accelerator_utilization().await, 0.0);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_a_miss() {
        let (manager, _) = manager();
        assert!(
            manager
                .put("answer", 42u64, 8, None, MemoryPriority::Normal)
                .await
        );
        assert!(manager.get::<String>("answer").await.is_none());
        assert_eq!(manager.get::<u64>("answer").await.as_deref(), Some(&42));

        let stats = manager.stats().await;
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.cache.misses, 1);
    }

    #[tokio::test]
    async fn test_replacing_key_frees_previous_backing() {
        let (manager, _) = manager();
        manager.put("k", 1u8, 1024, None, MemoryPriority::Normal).await;
        manager.put("k", 2u8, 2048, None, MemoryPriority::Normal).await;

        let stats = manager.stats().await;
        assert_eq!(stats.cache.entries, 1);
        assert_eq!(stats.pools["data_cache"].allocated_bytes, 2048);
        assert_eq!(stats.pools["data_cache"].allocation_count, 1);
    }
}
