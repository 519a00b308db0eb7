use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    coordinator::CoordinatorConfig, dispatcher::DispatcherConfig,
    load_balancer::LoadBalancerConfig, memory::MemoryConfig, observability::ObservabilityConfig,
    queue::QueueConfig, registry::RegistryConfig,
};
use crate::validation::ConfigValidator;
use crate::ConfigError;

/// 默认查找的配置文件位置
const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/orchestrator.toml", "orchestrator.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub load_balancer: LoadBalancerConfig,
    pub memory: MemoryConfig,
    pub registry: RegistryConfig,
    pub coordinator: CoordinatorConfig,
    pub dispatcher: DispatcherConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载配置：TOML文件，再叠加 `ORCHESTRATOR_` 前缀的环境变量
    ///
    /// 嵌套字段用双下划线分隔，例如 `ORCHESTRATOR_QUEUE__MAX_QUEUE_SIZE=500`。
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.queue.validate()?;
        self.load_balancer.validate()?;
        self.memory.validate()?;
        self.registry.validate()?;
        self.coordinator.validate()?;
        self.dispatcher.validate()?;
        self.observability.validate()?;

        for name in &self.coordinator.verification_workers {
            if self.registry.worker(name).is_none() {
                return Err(ConfigError::Validation(format!(
                    "coordinator.verification_workers references unknown worker: {name}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LoadBalancingStrategy;
    use orchestrator_core::models::{BackendKind, TaskType};
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_queue_size, 10000);
        assert_eq!(config.load_balancer.strategy, LoadBalancingStrategy::Intelligent);
        assert_eq!(config.memory.max_cache_entries, 10000);
        assert_eq!(config.registry.workers.len(), 3);
        assert_eq!(config.coordinator.consensus_threshold, 0.7);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_capability_matrix() {
        let config = AppConfig::default();
        let matrix = config.registry.capability_matrix().unwrap();
        assert_eq!(
            matrix.score("llama_70b_verification", TaskType::Verification),
            0.95
        );
        assert_eq!(matrix.score("qwen_7b_specialized", TaskType::Forecasting), 0.6);
    }

    #[test]
    fn test_app_config_from_toml() {
        let toml_str = r#"
[queue]
max_queue_size = 50

[load_balancer]
strategy = "least_connections"

[memory]
max_cache_entries = 100
data_cache_pool_gb = 1

[coordinator]
verification_workers = ["checker"]
consensus_threshold = 0.6

[registry]
autoload = ["analyst", "checker"]

[[registry.workers]]
name = "analyst"
priority = "high"
max_concurrent_requests = 2
specialized_domains = ["data_analysis"]

[registry.workers.capabilities]
data_analysis = 0.9

[[registry.workers]]
name = "checker"
priority = "medium"
max_concurrent_requests = 1
supported_task_types = ["verification"]

[registry.workers.backend]
kind = "http"
endpoint = "http://localhost:8000"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.queue.max_queue_size, 50);
        assert_eq!(config.queue.default_max_retries, 3);
        assert_eq!(config.load_balancer.strategy, LoadBalancingStrategy::LeastConnections);
        assert_eq!(config.registry.workers.len(), 2);
        assert_eq!(config.registry.autoload, vec!["analyst", "checker"]);
        let checker = config.registry.worker("checker").unwrap();
        assert!(matches!(checker.backend, BackendKind::Http { .. }));
        assert!(checker.supports(TaskType::Verification));
        assert!(!checker.supports(TaskType::DataAnalysis));
    }

    #[test]
    fn test_rejects_unknown_verification_worker() {
        let toml_str = r#"
[coordinator]
verification_workers = ["missing"]
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_rejects_invalid_capability_score() {
        let toml_str = r#"
[registry]
autoload = []

[[registry.workers]]
name = "analyst"
priority = "low"
max_concurrent_requests = 1

[registry.workers.capabilities]
forecasting = 1.5

[coordinator]
verification_workers = []
"#;
        let err = AppConfig::from_toml(toml_str).unwrap_err();
        assert!(err.to_string().contains("能力评分"));
    }

    #[test]
    fn test_toml_roundtrip_preserves_catalog() {
        let config = AppConfig::default();
        let serialized = config.to_toml().unwrap();
        let restored = AppConfig::from_toml(&serialized).unwrap();
        assert_eq!(restored.registry.workers.len(), config.registry.workers.len());
        assert_eq!(restored.registry.workers[0].name, "qwen_32b_primary");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[queue]
max_queue_size = 123

[dispatcher]
dispatch_interval_ms = 50
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.queue.max_queue_size, 123);
        assert_eq!(config.dispatcher.dispatch_interval_ms, 50);
        assert_eq!(config.registry.workers.len(), 3);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/orchestrator.toml")).is_err());
    }
}
