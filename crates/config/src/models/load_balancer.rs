use std::fmt;

use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// Worker选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    RoundRobin,
    LeastConnections,
    WeightedRoundRobin,
    ResourceAware,
    PerformanceBased,
    #[default]
    Intelligent,
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadBalancingStrategy::RoundRobin => "round_robin",
            LoadBalancingStrategy::LeastConnections => "least_connections",
            LoadBalancingStrategy::WeightedRoundRobin => "weighted_round_robin",
            LoadBalancingStrategy::ResourceAware => "resource_aware",
            LoadBalancingStrategy::PerformanceBased => "performance_based",
            LoadBalancingStrategy::Intelligent => "intelligent",
        };
        f.write_str(s)
    }
}

/// 智能策略的线性加权系数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub response_time: f64,
    pub error_rate: f64,
    pub load: f64,
    pub health: f64,
    pub resource_efficiency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            response_time: 0.30,
            error_rate: 0.25,
            load: 0.20,
            health: 0.15,
            resource_efficiency: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.response_time + self.error_rate + self.load + self.health + self.resource_efficiency
    }
}

/// 负载均衡器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategy,
    pub weights: ScoringWeights,
    /// 每个Worker保留的最近响应时间数量
    pub response_time_window: usize,
    /// 每个 (任务类型, Worker) 保留的历史样本数量
    pub history_length: usize,
    pub min_requests_for_stats: usize,
    pub max_alternatives: usize,
    /// 响应时间评分归零的阈值（秒）
    pub response_time_ceiling_seconds: f64,
    pub metrics_refresh_interval_seconds: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::Intelligent,
            weights: ScoringWeights::default(),
            response_time_window: 100,
            history_length: 50,
            min_requests_for_stats: 5,
            max_alternatives: 2,
            response_time_ceiling_seconds: 120.0,
            metrics_refresh_interval_seconds: 60,
        }
    }
}

impl ConfigValidator for LoadBalancerConfig {
    fn validate(&self) -> ConfigResult<()> {
        let weights = [
            ("load_balancer.weights.response_time", self.weights.response_time),
            ("load_balancer.weights.error_rate", self.weights.error_rate),
            ("load_balancer.weights.load", self.weights.load),
            ("load_balancer.weights.health", self.weights.health),
            (
                "load_balancer.weights.resource_efficiency",
                self.weights.resource_efficiency,
            ),
        ];
        for (field, value) in weights {
            ValidationUtils::validate_probability(value, field)?;
        }
        if self.weights.total() <= 0.0 {
            return Err(ConfigError::Validation(
                "load_balancer.weights must not all be zero".to_string(),
            ));
        }
        ValidationUtils::validate_count(
            self.response_time_window,
            "load_balancer.response_time_window",
            10000,
        )?;
        ValidationUtils::validate_count(self.history_length, "load_balancer.history_length", 10000)?;
        if self.response_time_ceiling_seconds <= 0.0 {
            return Err(ConfigError::Validation(
                "load_balancer.response_time_ceiling_seconds must be greater than 0".to_string(),
            ));
        }
        ValidationUtils::validate_interval_seconds(
            self.metrics_refresh_interval_seconds,
            "load_balancer.metrics_refresh_interval_seconds",
        )?;
        Ok(())
    }
}
