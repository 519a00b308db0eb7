use serde::{Deserialize, Serialize};

use crate::validation::{ConfigValidator, ValidationUtils};
use crate::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_listen_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_listen_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> ConfigResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log level: {}. Valid options: {:?}",
                self.log_level, valid_levels
            )));
        }
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Invalid log format: {}. Valid options: {:?}",
                self.log_format, valid_formats
            )));
        }
        if self.metrics_enabled {
            ValidationUtils::validate_not_empty(
                &self.metrics_listen_address,
                "observability.metrics_listen_address",
            )?;
            self.metrics_listen_address
                .parse::<std::net::SocketAddr>()
                .map_err(|e| {
                    ConfigError::Validation(format!(
                        "Invalid observability.metrics_listen_address: {e}"
                    ))
                })?;
        }
        Ok(())
    }
}
