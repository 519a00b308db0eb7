use std::collections::{BTreeMap, HashSet};

use orchestrator_core::models::{BackendKind, CapabilityMatrix, WorkerPriority, WorkerSpec};
use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

/// 资源限制
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    pub max_gpu_memory_gb: f64,
    pub max_ram_memory_gb: f64,
    pub gpu_utilization_threshold: f64,
    pub ram_utilization_threshold: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_gpu_memory_gb: 60.0,
            max_ram_memory_gb: 160.0,
            gpu_utilization_threshold: 0.85,
            ram_utilization_threshold: 0.90,
        }
    }
}

/// Worker注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub workers: Vec<WorkerSpec>,
    /// 启动时加载的Worker
    pub autoload: Vec<String>,
    pub resource_limits: ResourceLimits,
    pub health_check_interval_seconds: u64,
    pub resource_check_interval_seconds: u64,
    /// 多久未使用视为空闲
    pub idle_penalty_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            autoload: vec![
                "qwen_32b_primary".to_string(),
                "llama_70b_verification".to_string(),
            ],
            resource_limits: ResourceLimits::default(),
            health_check_interval_seconds: 30,
            resource_check_interval_seconds: 10,
            idle_penalty_seconds: 3600,
        }
    }
}

fn capabilities(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
    entries
        .iter()
        .map(|(task_type, score)| (task_type.to_string(), *score))
        .collect()
}

fn default_workers() -> Vec<WorkerSpec> {
    vec![
        WorkerSpec {
            name: "qwen_32b_primary".to_string(),
            model_path: "qwen2.5:32b".to_string(),
            priority: WorkerPriority::High,
            gpu_memory_gb: 32.0,
            ram_memory_gb: 8.0,
            max_concurrent_requests: 2,
            specialized_domains: vec![
                "hypothesis_generation".to_string(),
                "data_analysis".to_string(),
                "policy_analysis".to_string(),
                "forecasting".to_string(),
                "research_synthesis".to_string(),
            ],
            supported_task_types: vec![],
            capabilities: capabilities(&[
                ("hypothesis_generation", 0.9),
                ("data_analysis", 0.9),
                ("policy_analysis", 0.8),
                ("forecasting", 0.8),
                ("research_synthesis", 0.9),
            ]),
            backend: BackendKind::default(),
            context_length: 32768,
            temperature: 0.7,
        },
        WorkerSpec {
            name: "llama_70b_verification".to_string(),
            model_path: "llama3.1:70b".to_string(),
            priority: WorkerPriority::Medium,
            gpu_memory_gb: 24.0,
            ram_memory_gb: 12.0,
            max_concurrent_requests: 1,
            specialized_domains: vec![
                "verification".to_string(),
                "data_analysis".to_string(),
                "research_synthesis".to_string(),
            ],
            supported_task_types: vec![],
            capabilities: capabilities(&[
                ("verification", 0.95),
                ("data_analysis", 0.8),
                ("research_synthesis", 0.85),
            ]),
            backend: BackendKind::default(),
            context_length: 8192,
            temperature: 0.3,
        },
        WorkerSpec {
            name: "qwen_7b_specialized".to_string(),
            model_path: "qwen2.5:7b".to_string(),
            priority: WorkerPriority::Low,
            gpu_memory_gb: 8.0,
            ram_memory_gb: 4.0,
            max_concurrent_requests: 3,
            specialized_domains: vec![
                "data_enrichment".to_string(),
                "anomaly_detection".to_string(),
                "report_generation".to_string(),
            ],
            supported_task_types: vec![],
            capabilities: capabilities(&[
                ("data_enrichment", 0.9),
                ("anomaly_detection", 0.8),
                ("report_generation", 0.7),
            ]),
            backend: BackendKind::default(),
            context_length: 32768,
            temperature: 0.5,
        },
    ]
}

impl RegistryConfig {
    pub fn capability_matrix(&self) -> ConfigResult<CapabilityMatrix> {
        Ok(CapabilityMatrix::from_specs(&self.workers)?)
    }

    pub fn worker(&self, name: &str) -> Option<&WorkerSpec> {
        self.workers.iter().find(|spec| spec.name == name)
    }
}

impl ConfigValidator for RegistryConfig {
    fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for spec in &self.workers {
            ValidationUtils::validate_not_empty(&spec.name, "registry.workers.name")?;
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate worker name: {}",
                    spec.name
                )));
            }
            if spec.max_concurrent_requests == 0 {
                return Err(ConfigError::Validation(format!(
                    "worker {} max_concurrent_requests must be greater than 0",
                    spec.name
                )));
            }
            if spec.gpu_memory_gb < 0.0 || spec.ram_memory_gb < 0.0 {
                return Err(ConfigError::Validation(format!(
                    "worker {} resource requirements must not be negative",
                    spec.name
                )));
            }
            match &spec.backend {
                BackendKind::Http { endpoint, .. } => {
                    ValidationUtils::validate_url(endpoint, "registry.workers.backend.endpoint")?
                }
                BackendKind::Simulated { failure_rate, .. } => ValidationUtils::validate_probability(
                    *failure_rate,
                    "registry.workers.backend.failure_rate",
                )?,
            }
        }
        self.capability_matrix()?;

        for name in &self.autoload {
            if !names.contains(name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "autoload references unknown worker: {name}"
                )));
            }
        }

        ValidationUtils::validate_ratio(
            self.resource_limits.gpu_utilization_threshold,
            "registry.resource_limits.gpu_utilization_threshold",
        )?;
        ValidationUtils::validate_ratio(
            self.resource_limits.ram_utilization_threshold,
            "registry.resource_limits.ram_utilization_threshold",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.health_check_interval_seconds,
            "registry.health_check_interval_seconds",
        )?;
        ValidationUtils::validate_interval_seconds(
            self.resource_check_interval_seconds,
            "registry.resource_check_interval_seconds",
        )?;
        Ok(())
    }
}
