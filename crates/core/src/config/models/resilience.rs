use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::errors::{OrchestratorError, OrchestratorResult};

/// Agent健康监控配置
///
/// 心跳缺失超过 `heartbeat_timeout_seconds` 标记为degraded，
/// 超过两倍阈值标记为unhealthy；unhealthy后经过宽限期
/// （容忍短暂网络分区）才回收其在途任务。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub heartbeat_timeout_seconds: i64,
    pub sweep_interval_seconds: u64,
    pub grace_period_seconds: i64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 30,
            sweep_interval_seconds: 10,
            grace_period_seconds: 60,
        }
    }
}

impl ConfigValidator for HealthMonitorConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        if self.heartbeat_timeout_seconds <= 0 {
            return Err(OrchestratorError::config_error(
                "health.heartbeat_timeout_seconds must be greater than 0",
            ));
        }
        ValidationUtils::validate_timeout_seconds(
            self.sweep_interval_seconds,
            "health.sweep_interval_seconds",
        )?;
        if self.grace_period_seconds < 0 {
            return Err(OrchestratorError::config_error(
                "health.grace_period_seconds cannot be negative",
            ));
        }
        Ok(())
    }
}

/// 任务失败重试策略配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// 基础重试间隔（秒）
    pub base_delay_seconds: u64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 5,
            max_delay_seconds: 300,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl ConfigValidator for RetryPolicyConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.base_delay_seconds,
            "retry.base_delay_seconds",
        )?;
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(OrchestratorError::config_error(
                "retry.max_delay_seconds must be >= retry.base_delay_seconds",
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::config_error(
                "retry.backoff_multiplier must be >= 1.0",
            ));
        }
        ValidationUtils::validate_ratio(self.jitter_factor, "retry.jitter_factor")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_config_validation() {
        let config = HealthMonitorConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.heartbeat_timeout_seconds = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.grace_period_seconds = -1;
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_retry_config_validation() {
        let config = RetryPolicyConfig::default();
        assert!(config.validate().is_ok());

        let mut invalid = config.clone();
        invalid.max_delay_seconds = 1;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.backoff_multiplier = 0.5;
        assert!(invalid.validate().is_err());

        let mut invalid = config.clone();
        invalid.jitter_factor = 2.0;
        assert!(invalid.validate().is_err());
    }
}
