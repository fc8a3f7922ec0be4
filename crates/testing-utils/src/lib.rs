//! # Orchestrator Testing Utils
//!
//! Shared testing utilities for the task orchestration workspace.
//! Provides in-memory repository mocks that honor the same conditional
//! update guards as the PostgreSQL implementations, plus test data
//! builders with sensible defaults.
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! orchestrator-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod mocks;

pub use builders::{AgentBuilder, TaskBuilder};
pub use mocks::{MockAgentRepository, MockTaskRepository};
