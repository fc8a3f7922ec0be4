//! Test data builders
//!
//! Builder patterns for creating test entities with sensible defaults
//! and easy customization. Timestamps can be backdated to exercise
//! aging, watchdog and heartbeat staleness paths.

use chrono::{DateTime, Utc};

use orchestrator_domain::{AgentInfo, AgentStatus, Capability, Task, TaskStatus};

/// Builder for test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: 1,
                task_type: "scrape".to_string(),
                payload: serde_json::json!({}),
                priority: 0,
                status: TaskStatus::Pending,
                assigned_agent_id: None,
                created_by: "test-producer".to_string(),
                result: None,
                retry_count: 0,
                max_retries: 3,
                timeout_seconds: 300,
                scheduled_at: now,
                created_at: now,
                started_at: None,
                completed_at: None,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.task.payload = payload;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.task.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_assigned_agent(mut self, agent_id: &str) -> Self {
        self.task.assigned_agent_id = Some(agent_id.to_string());
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.task.retry_count = retry_count;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i32) -> Self {
        self.task.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<Utc>) -> Self {
        self.task.scheduled_at = scheduled_at;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.task.started_at = Some(started_at);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for test AgentInfo entities
pub struct AgentBuilder {
    agent: AgentInfo,
}

impl AgentBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            agent: AgentInfo {
                id: "agent-1".to_string(),
                name: "test-agent".to_string(),
                agent_type: "scraper".to_string(),
                capabilities: vec![Capability::new("scrape").unwrap()],
                status: AgentStatus::Running,
                last_heartbeat: now,
                registered_at: now,
                metadata: serde_json::Value::Null,
            },
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.agent.id = id.to_string();
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.agent.name = name.to_string();
        self
    }

    pub fn with_agent_type(mut self, agent_type: &str) -> Self {
        self.agent.agent_type = agent_type.to_string();
        self
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.agent.capabilities = capabilities
            .iter()
            .map(|c| Capability::new(c.to_string()).expect("builder能力标签非法"))
            .collect();
        self
    }

    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.agent.status = status;
        self
    }

    pub fn with_last_heartbeat(mut self, last_heartbeat: DateTime<Utc>) -> Self {
        self.agent.last_heartbeat = last_heartbeat;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.agent.metadata = metadata;
        self
    }

    pub fn build(self) -> AgentInfo {
        self.agent
    }
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}
