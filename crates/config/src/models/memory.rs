use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 内存管理器配置，容量单位为GiB
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_system_ram_gb: f64,
    pub max_accelerator_gb: f64,
    pub model_weights_pool_gb: f64,
    pub data_cache_pool_gb: f64,
    pub temporary_pool_gb: f64,
    pub ram_pressure_threshold: f64,
    pub accelerator_pressure_threshold: f64,
    pub critical_threshold: f64,
    pub cache_ttl_seconds: u64,
    pub max_cache_entries: usize,
    pub cache_cleanup_interval_seconds: u64,
    pub monitor_interval_seconds: u64,
    /// 临时分配空闲多久后回收
    pub temporary_idle_seconds: u64,
    /// 低优先级分配空闲多久后回收
    pub low_priority_idle_seconds: u64,
    /// 读取 /proc/meminfo 作为系统内存来源
    pub use_system_probe: bool,
    pub pressure_channel_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_system_ram_gb: 160.0,
            max_accelerator_gb: 60.0,
            model_weights_pool_gb: 32.0,
            data_cache_pool_gb: 16.0,
            temporary_pool_gb: 8.0,
            ram_pressure_threshold: 0.85,
            accelerator_pressure_threshold: 0.90,
            critical_threshold: 0.95,
            cache_ttl_seconds: 3600, // 1小时
            max_cache_entries: 10000,
            cache_cleanup_interval_seconds: 300, // 5分钟
            monitor_interval_seconds: 30,
            temporary_idle_seconds: 300,
            low_priority_idle_seconds: 1800,
            use_system_probe: true,
            pressure_channel_capacity: 64,
        }
    }
}

impl ConfigValidator for MemoryConfig {
    fn validate(&self) -> ConfigResult<()> {
        let sizes = [
            ("memory.max_system_ram_gb", self.max_system_ram_gb),
            ("memory.max_accelerator_gb", self.max_accelerator_gb),
            ("memory.model_weights_pool_gb", self.model_weights_pool_gb),
            ("memory.data_cache_pool_gb", self.data_cache_pool_gb),
            ("memory.temporary_pool_gb", self.temporary_pool_gb),
        ];
        for (field, value) in sizes {
            if !(value >= 0.0) {
                return Err(ConfigError::Validation(format!(
                    "{field} must not be negative, got {value}"
                )));
            }
        }
        ValidationUtils::validate_ratio(self.ram_pressure_threshold, "memory.ram_pressure_threshold")?;
        ValidationUtils::validate_ratio(
            self.accelerator_pressure_threshold,
            "memory.accelerator_pressure_threshold",
        )?;
        ValidationUtils::validate_ratio(self.critical_threshold, "memory.critical_threshold")?;
        if self.critical_threshold < self.ram_pressure_threshold {
            return Err(ConfigError::Validation(
                "memory.critical_threshold must not be below memory.ram_pressure_threshold"
                    .to_string(),
            ));
        }
        ValidationUtils::validate_interval_seconds(self.cache_ttl_seconds, "memory.cache_ttl_seconds")?;
        ValidationUtils::validate_count(self.max_cache_entries, "memory.max_cache_entries", 10_000_000)?;
        ValidationUtils::validate_interval_seconds(
            self.cache_cleanup_interval_seconds,
            "memory.cache_cleanup_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.monitor_interval_seconds,
            "memory.monitor_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.pressure_channel_capacity,
            "memory.pressure_channel_capacity",
            65536,
        )?;
        Ok(())
    }
}
