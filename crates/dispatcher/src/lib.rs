//! # Orchestrator Dispatcher
//!
//! 调度侧服务：派发循环、执行超时看门狗、重试/死信管理、
//! Agent健康扫描。所有服务只通过仓储的条件更新原语改动状态，
//! 可以多副本并行运行。

pub mod agent_failure_detector;
pub mod dispatcher;
pub mod retry_service;
pub mod watchdog;

pub use agent_failure_detector::AgentFailureDetector;
pub use dispatcher::{TaskDelivery, TaskDispatcher};
pub use retry_service::{FailureHandler, TaskFailureHandler};
pub use watchdog::TimeoutWatchdog;
