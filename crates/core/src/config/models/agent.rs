use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::errors::{OrchestratorError, OrchestratorResult};

/// Agent运行时配置
///
/// `capabilities` 在注册时按能力标签规则校验，
/// 非法标签直接拒绝启动而不是在派发时做原始字符串比较。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentRuntimeConfig {
    pub enabled: bool,
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub heartbeat_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_concurrent_tasks: usize,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "agent-001".to_string(),
            agent_type: "executor".to_string(),
            capabilities: vec!["execute".to_string()],
            heartbeat_interval_seconds: 10,
            poll_interval_seconds: 1,
            max_concurrent_tasks: 5,
        }
    }
}

impl ConfigValidator for AgentRuntimeConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        ValidationUtils::validate_not_empty(&self.name, "agent.name")?;
        ValidationUtils::validate_not_empty(&self.agent_type, "agent.agent_type")?;
        ValidationUtils::validate_timeout_seconds(
            self.heartbeat_interval_seconds,
            "agent.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.poll_interval_seconds,
            "agent.poll_interval_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_concurrent_tasks,
            "agent.max_concurrent_tasks",
            1000,
        )?;

        if self.capabilities.is_empty() {
            return Err(OrchestratorError::config_error(
                "agent.capabilities cannot be empty",
            ));
        }
        for capability in &self.capabilities {
            ValidationUtils::validate_not_empty(capability, "agent.capabilities")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_validation() {
        let config = AgentRuntimeConfig {
            enabled: true,
            name: "scraper-01".to_string(),
            agent_type: "scraper".to_string(),
            capabilities: vec!["scrape".to_string(), "extract".to_string()],
            heartbeat_interval_seconds: 10,
            poll_interval_seconds: 1,
            max_concurrent_tasks: 5,
        };
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.name = String::new();
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.capabilities = vec![];
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.heartbeat_interval_seconds = 0;
        assert!(invalid.validate().is_err());
    }
}
