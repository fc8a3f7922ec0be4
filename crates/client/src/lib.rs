//! # Orchestrator Client
//!
//! 面向生产者与Agent的两个契约门面。都是仓储之上的薄封装：
//! 不持有额外状态、不缓存认领决策，正确性完全来自存储层的
//! 条件更新原语。

pub mod agent;
pub mod producer;

pub use agent::AgentClient;
pub use producer::ProducerClient;
