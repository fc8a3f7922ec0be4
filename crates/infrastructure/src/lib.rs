//! # Orchestrator Infrastructure
//!
//! 基础设施层：PostgreSQL仓储实现、数据库连接管理、
//! 可匹配Agent的TTL缓存、指标收集。

pub mod cache;
pub mod database;
pub mod metrics;

pub use cache::EligibleAgentCache;
pub use database::manager::DatabaseManager;
pub use database::postgres::{PostgresAgentRepository, PostgresTaskRepository};
pub use metrics::MetricsCollector;
