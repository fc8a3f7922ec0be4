//! # Orchestrator Agent
//!
//! Agent侧运行时：注册、心跳循环、任务拉取与带超时的执行。
//! 业务执行逻辑通过 [`TaskExecutor`] trait 注入，
//! 运行时本身不关心任务内容。

pub mod executor;
pub mod executors;
pub mod heartbeat_manager;
pub mod service;

pub use executor::{ExecutorRegistry, TaskExecutor};
pub use executors::ShellExecutor;
pub use heartbeat_manager::HeartbeatManager;
pub use service::AgentService;
