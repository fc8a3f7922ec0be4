pub mod models;
pub mod validation;

pub use models::{
    AgentRuntimeConfig, AppConfig, DatabaseConfig, DispatcherConfig, HealthMonitorConfig,
    ObservabilityConfig, RetryPolicyConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};
