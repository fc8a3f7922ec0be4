//! # Orchestrator Domain
//!
//! 领域层：任务与Agent实体、能力值对象、仓储抽象。
//! 所有状态变更都通过仓储的条件更新原语完成，
//! 任何组件都不允许先读后写地修改任务或Agent状态。

pub mod models;
pub mod repositories;
pub mod value_objects;

pub use models::*;
pub use repositories::*;
pub use value_objects::*;
