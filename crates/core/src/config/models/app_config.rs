use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::config::validation::ConfigValidator;
use crate::errors::{OrchestratorError, OrchestratorResult};

use super::{
    agent::AgentRuntimeConfig,
    database::DatabaseConfig,
    dispatcher::DispatcherConfig,
    observability::ObservabilityConfig,
    resilience::{HealthMonitorConfig, RetryPolicyConfig},
};

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub health: HealthMonitorConfig,
    pub retry: RetryPolicyConfig,
    pub agent: AgentRuntimeConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: ORCHESTRATOR_)
    pub fn load(config_path: Option<&str>) -> OrchestratorResult<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(OrchestratorError::config_error(format!(
                    "配置文件不存在: {path}"
                )));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = [
                "config/orchestrator.toml",
                "orchestrator.toml",
                "/etc/orchestrator/config.toml",
            ];
            for path in &default_paths {
                if Path::new(path).exists() {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                    break;
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("ORCHESTRATOR")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| OrchestratorError::config_error(format!("构建配置失败: {e}")))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| OrchestratorError::config_error(format!("解析配置失败: {e}")))?;

        app_config.validate()?;
        Ok(app_config)
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        self.database.validate()?;
        self.dispatcher.validate()?;
        self.health.validate()?;
        self.retry.validate()?;
        // Agent段仅在启用时要求完整
        if self.agent.enabled {
            self.agent.validate()?;
        }
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.poll_interval_seconds, 1);
        assert_eq!(config.health.heartbeat_timeout_seconds, 30);
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string(&config).expect("serialize");
        let deserialized: AppConfig = toml::from_str(&serialized).expect("deserialize");
        assert_eq!(
            config.retry.base_delay_seconds,
            deserialized.retry.base_delay_seconds
        );
        assert_eq!(config.database.url, deserialized.database.url);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let partial = r#"
            [dispatcher]
            poll_interval_seconds = 5
            aging_window_seconds = 120
        "#;
        let config: AppConfig = toml::from_str(partial).expect("deserialize");
        assert_eq!(config.dispatcher.poll_interval_seconds, 5);
        assert_eq!(config.dispatcher.aging_window_seconds, 120);
        // 未指定的段落回落到默认值
        assert_eq!(config.retry.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let result = AppConfig::load(Some("/nonexistent/orchestrator.toml"));
        assert!(result.is_err());
    }
}
