mod agent;
mod app_config;
mod database;
mod dispatcher;
mod observability;
mod resilience;

pub use agent::AgentRuntimeConfig;
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher::DispatcherConfig;
pub use observability::ObservabilityConfig;
pub use resilience::{HealthMonitorConfig, RetryPolicyConfig};
