use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::errors::OrchestratorResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/orchestrator".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout_seconds: 30,
            idle_timeout_seconds: 600,
        }
    }
}

impl ConfigValidator for DatabaseConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        ValidationUtils::validate_not_empty(&self.url, "database.url")?;
        ValidationUtils::validate_count(self.max_connections as usize, "database.max_connections", 10000)?;
        if self.min_connections > self.max_connections {
            return Err(crate::errors::OrchestratorError::config_error(
                "database.min_connections cannot exceed database.max_connections",
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.connect_timeout_seconds,
            "database.connect_timeout_seconds",
        )?;
        Ok(())
    }
}
