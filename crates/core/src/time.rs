use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

pub type Timestamp = DateTime<Utc>;

/// 时间提供者
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// 默认时间提供者
#[derive(Debug, Clone, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// 可手动推进的时间提供者，用于测试TTL、退避和超时
#[derive(Debug, Clone)]
pub struct ManualTimeProvider {
    current: Arc<RwLock<Timestamp>>,
}

impl ManualTimeProvider {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: Timestamp) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut current) = self.current.write() {
            *current += by;
        }
    }

    pub fn advance_secs_f64(&self, seconds: f64) {
        self.advance(Duration::milliseconds((seconds * 1000.0) as i64));
    }

    pub fn set(&self, to: Timestamp) {
        if let Ok(mut current) = self.current.write() {
            *current = to;
        }
    }
}

impl Default for ManualTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> Timestamp {
        self.current
            .read()
            .map(|current| *current)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// 两个时间点之间的秒数（浮点）
pub fn seconds_between(earlier: Timestamp, later: Timestamp) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

pub type SharedTimeProvider = Arc<dyn TimeProvider>;

pub fn system_time() -> SharedTimeProvider {
    Arc::new(SystemTimeProvider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_advances() {
        let clock = ManualTimeProvider::new();
        let start = clock.now();
        clock.advance_secs_f64(1.5);
        assert!((seconds_between(start, clock.now()) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = ManualTimeProvider::new();
        let other = clock.clone();
        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now(), other.now());
    }
}
