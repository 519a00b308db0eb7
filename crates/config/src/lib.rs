pub mod models;
pub mod validation;

pub use models::{
    AnalysisContextConfig, AppConfig, CoordinatorConfig, DispatcherConfig, LoadBalancerConfig,
    LoadBalancingStrategy, MemoryConfig, ObservabilityConfig, QueueConfig, RegistryConfig,
    ResourceLimits, ScoringWeights,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration error enumeration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<orchestrator_core::OrchestratorError> for ConfigError {
    fn from(err: orchestrator_core::OrchestratorError) -> Self {
        ConfigError::Validation(err.to_string())
    }
}
