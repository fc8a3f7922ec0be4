use serde::{Deserialize, Serialize};

use crate::config::validation::{ConfigValidator, ValidationUtils};
use crate::errors::OrchestratorResult;

/// Dispatcher 轮询与认领配置
///
/// `aging_window_seconds` 控制防饿死的优先级老化窗口：
/// 有效优先级 = priority + floor(等待秒数 / aging_window_seconds)。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub aging_window_seconds: u64,
    pub max_claims_per_cycle: usize,
    /// 存储瞬时错误的重试基础间隔（毫秒）
    pub store_retry_base_ms: u64,
    /// 存储瞬时错误的重试上限间隔（毫秒）
    pub store_retry_max_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: 1,
            aging_window_seconds: 60,
            max_claims_per_cycle: 100,
            store_retry_base_ms: 100,
            store_retry_max_ms: 5000,
        }
    }
}

impl ConfigValidator for DispatcherConfig {
    fn validate(&self) -> OrchestratorResult<()> {
        ValidationUtils::validate_timeout_seconds(
            self.poll_interval_seconds,
            "dispatcher.poll_interval_seconds",
        )?;
        ValidationUtils::validate_timeout_seconds(
            self.aging_window_seconds,
            "dispatcher.aging_window_seconds",
        )?;
        ValidationUtils::validate_count(
            self.max_claims_per_cycle,
            "dispatcher.max_claims_per_cycle",
            10000,
        )?;
        if self.store_retry_base_ms == 0 || self.store_retry_max_ms < self.store_retry_base_ms {
            return Err(crate::errors::OrchestratorError::config_error(
                "dispatcher.store_retry_max_ms must be >= dispatcher.store_retry_base_ms > 0",
            ));
        }
        Ok(())
    }
}
