//! # Orchestrator Core
//!
//! 编排系统的基础crate，提供统一的错误类型和配置模型。
//! 领域实体与仓储抽象位于 `orchestrator-domain`。

pub mod config;
pub mod errors;

pub use config::AppConfig;
pub use errors::{OrchestratorError, OrchestratorResult};
