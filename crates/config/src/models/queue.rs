use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 任务队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_queue_size: usize,
    pub default_max_retries: u32,
    pub default_timeout_seconds: u64,
    /// 指数退避的上限
    pub max_backoff_seconds: u64,
    pub timeout_check_interval_seconds: u64,
    /// 终态任务的保留时长
    pub retention_hours: u64,
    pub cleanup_interval_seconds: u64,
    pub monitor_interval_seconds: u64,
    pub backlog_warning_ratio: f64,
    pub failure_warning_ratio: f64,
    pub throughput_window_seconds: u64,
    pub event_channel_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10000,
            default_max_retries: 3,
            default_timeout_seconds: 300,
            max_backoff_seconds: 60,
            timeout_check_interval_seconds: 1,
            retention_hours: 24,
            cleanup_interval_seconds: 3600, // 每小时清理一次
            monitor_interval_seconds: 60,
            backlog_warning_ratio: 0.8,
            failure_warning_ratio: 0.1,
            throughput_window_seconds: 300, // 最近5分钟
            event_channel_capacity: 1024,
        }
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_count(self.max_queue_size, "queue.max_queue_size", 1_000_000)?;
        ValidationUtils::validate_interval_seconds(
            self.default_timeout_seconds,
            "queue.default_timeout_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.max_backoff_seconds,
            "queue.max_backoff_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.timeout_check_interval_seconds,
            "queue.timeout_check_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.cleanup_interval_seconds,
            "queue.cleanup_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.monitor_interval_seconds,
            "queue.monitor_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.throughput_window_seconds,
            "queue.throughput_window_seconds",
        )?;
        ValidationUtils::validate_ratio(self.backlog_warning_ratio, "queue.backlog_warning_ratio")?;
        ValidationUtils::validate_ratio(self.failure_warning_ratio, "queue.failure_warning_ratio")?;
        ValidationUtils::validate_count(
            self.event_channel_capacity,
            "queue.event_channel_capacity",
            65536,
        )?;
        Ok(())
    }
}
