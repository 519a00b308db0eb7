use serde::Serialize;

use orchestrator_core::time::Timestamp;

/// 资源压力等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Elevated,
    Critical,
}

impl PressureLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PressureLevel::Normal => "normal",
            PressureLevel::Elevated => "elevated",
            PressureLevel::Critical => "critical",
        }
    }
}

/// 资源压力信号
///
/// 只用于触发自动缓解（清理、卸载Worker），不会作为错误返回给提交方。
#[derive(Debug, Clone, Serialize)]
pub struct ResourcePressureEvent {
    pub level: PressureLevel,
    pub ram_utilization: f64,
    pub accelerator_utilization: f64,
    /// 各内存池中最高的使用率
    pub pool_utilization: f64,
    pub ram_over_threshold: bool,
    pub accelerator_over_threshold: bool,
    pub timestamp: Timestamp,
}

impl ResourcePressureEvent {
    pub fn is_pressure(&self) -> bool {
        self.level != PressureLevel::Normal
    }
}
