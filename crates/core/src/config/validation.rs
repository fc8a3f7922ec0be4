use crate::errors::{OrchestratorError, OrchestratorResult};

/// Validation hook implemented by every config section
pub trait ConfigValidator {
    fn validate(&self) -> OrchestratorResult<()>;
}

/// Shared validation helpers for config sections
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field: &str) -> OrchestratorResult<()> {
        if value.trim().is_empty() {
            return Err(OrchestratorError::config_error(format!(
                "{field} cannot be empty"
            )));
        }
        Ok(())
    }

    pub fn validate_timeout_seconds(value: u64, field: &str) -> OrchestratorResult<()> {
        if value == 0 {
            return Err(OrchestratorError::config_error(format!(
                "{field} must be greater than 0"
            )));
        }
        Ok(())
    }

    pub fn validate_count(value: usize, field: &str, max: usize) -> OrchestratorResult<()> {
        if value == 0 || value > max {
            return Err(OrchestratorError::config_error(format!(
                "{field} must be in range 1..={max}, got {value}"
            )));
        }
        Ok(())
    }

    pub fn validate_ratio(value: f64, field: &str) -> OrchestratorResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(OrchestratorError::config_error(format!(
                "{field} must be in range 0.0..=1.0, got {value}"
            )));
        }
        Ok(())
    }
}
