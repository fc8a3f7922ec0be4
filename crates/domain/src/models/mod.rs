mod agent;
mod task;

pub use agent::{AgentInfo, AgentRegistration, AgentStatus};
pub use task::{NewTask, QueueStats, Task, TaskFilter, TaskStatus, TaskStatusView};
