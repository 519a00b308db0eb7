use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::ConfigResult;

/// 分析领域上下文
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisContextConfig {
    pub focus_region: String,
    pub primary_data_sources: Vec<String>,
    pub specialization_areas: Vec<String>,
    pub framework: String,
}

impl Default for AnalysisContextConfig {
    fn default() -> Self {
        Self {
            focus_region: "Australia".to_string(),
            primary_data_sources: vec![
                "RBA".to_string(),
                "ABS".to_string(),
                "Treasury".to_string(),
            ],
            specialization_areas: vec![
                "monetary_policy".to_string(),
                "trade_analysis".to_string(),
                "commodity_economics".to_string(),
                "policy_impact_assessment".to_string(),
            ],
            framework: "circular_flow".to_string(),
        }
    }
}

/// 协调器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub verification_workers: Vec<String>,
    pub consensus_threshold: f64,
    pub multi_worker_verification: bool,
    pub reconcile_interval_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub verification_timeout_seconds: u64,
    /// 同步等待验证结果的上限
    pub verification_wait_seconds: u64,
    pub verification_poll_interval_ms: u64,
    pub default_confidence: f64,
    pub empty_verification_confidence: f64,
    pub memory_alert_threshold: f64,
    pub backlog_alert_threshold: usize,
    pub health_alert_threshold: f64,
    pub completed_history_limit: usize,
    pub analysis_context: AnalysisContextConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            verification_workers: vec!["llama_70b_verification".to_string()],
            consensus_threshold: 0.7,
            multi_worker_verification: true,
            reconcile_interval_seconds: 5,
            health_check_interval_seconds: 30,
            verification_timeout_seconds: 120,
            verification_wait_seconds: 150,
            verification_poll_interval_ms: 500,
            default_confidence: 0.8,
            empty_verification_confidence: 0.5,
            memory_alert_threshold: 0.9,
            backlog_alert_threshold: 1000,
            health_alert_threshold: 0.5,
            completed_history_limit: 10000,
            analysis_context: AnalysisContextConfig::default(),
        }
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> ConfigResult<()> {
        ValidationUtils::validate_ratio(self.consensus_threshold, "coordinator.consensus_threshold")?;
        ValidationUtils::validate_interval_seconds(
            self.reconcile_interval_seconds,
            "coordinator.reconcile_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.health_check_interval_seconds,
            "coordinator.health_check_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.verification_timeout_seconds,
            "coordinator.verification_timeout_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.verification_poll_interval_ms,
            "coordinator.verification_poll_interval_ms",
        )?;
        ValidationUtils::validate_probability(self.default_confidence, "coordinator.default_confidence")?;
        ValidationUtils::validate_probability(
            self.empty_verification_confidence,
            "coordinator.empty_verification_confidence",
        )?;
        ValidationUtils::validate_ratio(
            self.memory_alert_threshold,
            "coordinator.memory_alert_threshold",
        )?;
        ValidationUtils::validate_ratio(
            self.health_alert_threshold,
            "coordinator.health_alert_threshold",
        )?;
        ValidationUtils::validate_count(
            self.completed_history_limit,
            "coordinator.completed_history_limit",
            1_000_000,
        )?;
        ValidationUtils::validate_not_empty(
            &self.analysis_context.focus_region,
            "coordinator.analysis_context.focus_region",
        )?;
        Ok(())
    }
}
