use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 派发循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub dispatch_interval_ms: u64,
    /// 每轮最多检查的待处理任务数
    pub max_scan_per_cycle: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dispatch_interval_ms: 100,
            max_scan_per_cycle: 64,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_interval_seconds(
            self.dispatch_interval_ms,
            "dispatcher.dispatch_interval_ms",
        )?;
        ValidationUtils::validate_count(self.max_scan_per_cycle, "dispatcher.max_scan_per_cycle", 10000)?;
        Ok(())
    }
}
