//! 系统内存探测

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// 一次系统内存采样（字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemMemorySample {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl SystemMemorySample {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }

    pub fn utilization(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes() as f64 / self.total_bytes as f64
    }
}

pub trait SystemMemoryProbe: Send + Sync {
    /// 无法获取时返回 None，此时只使用记账数据
    fn sample(&self) -> Option<SystemMemorySample>;
}

/// 读取 `/proc/meminfo`
#[derive(Debug, Default)]
pub struct ProcMeminfoProbe;

impl ProcMeminfoProbe {
    fn parse_kb(line: &str) -> Option<u64> {
        line.split_whitespace().nth(1)?.parse::<u64>().ok()
    }

    pub fn parse(meminfo: &str) -> Option<SystemMemorySample> {
        let mut total = None;
        let mut available = None;
        for line in meminfo.lines() {
            if line.starts_with("MemTotal:") {
                total = Self::parse_kb(line);
            } else if line.starts_with("MemAvailable:") {
                available = Self::parse_kb(line);
            }
        }
        Some(SystemMemorySample {
            total_bytes: total? * 1024,
            available_bytes: available? * 1024,
        })
    }
}

impl SystemMemoryProbe for ProcMeminfoProbe {
    fn sample(&self) -> Option<SystemMemorySample> {
        match std::fs::read_to_string("/proc/meminfo") {
            Ok(meminfo) => Self::parse(&meminfo),
            Err(e) => {
                debug!("读取 /proc/meminfo 失败: {}", e);
                None
            }
        }
    }
}

/// 可手动设置的探测结果，用于测试
#[derive(Debug)]
pub struct StaticMemoryProbe {
    total_bytes: AtomicU64,
    available_bytes: AtomicU64,
}

impl StaticMemoryProbe {
    pub fn new(total_bytes: u64, available_bytes: u64) -> Self {
        Self {
            total_bytes: AtomicU64::new(total_bytes),
            available_bytes: AtomicU64::new(available_bytes),
        }
    }

    pub fn set_available(&self, available_bytes: u64) {
        self.available_bytes.store(available_bytes, Ordering::SeqCst);
    }
}

impl SystemMemoryProbe for StaticMemoryProbe {
    fn sample(&self) -> Option<SystemMemorySample> {
        Some(SystemMemorySample {
            total_bytes: self.total_bytes.load(Ordering::SeqCst),
            available_bytes: self.available_bytes.load(Ordering::SeqCst),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1000000 kB\nMemAvailable:    4096000 kB\n";
        let sample = ProcMeminfoProbe::parse(meminfo).unwrap();
        assert_eq!(sample.total_bytes, 16384000 * 1024);
        assert_eq!(sample.available_bytes, 4096000 * 1024);
        assert!((sample.utilization() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_parse_incomplete_meminfo() {
        assert!(ProcMeminfoProbe::parse("MemTotal: 1024 kB\n").is_none());
    }
}
