//! Mock implementations of the repository traits
//!
//! In-memory implementations for unit testing without a database.
//! Every state transition applies the same guards as the PostgreSQL
//! repositories: tests exercising concurrency and retry semantics see
//! identical behavior.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    AgentInfo, AgentRegistration, AgentRepository, AgentStatus, Capability, NewTask, QueueStats,
    Task, TaskFailure, TaskFilter, TaskRepository, TaskStatus,
};

/// In-memory TaskRepository mock
#[derive(Debug, Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, Task>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;
        for task in tasks {
            max_id = max_id.max(task.id);
            map.insert(task.id, task);
        }
        Self {
            tasks: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn get_all(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, new_task: &NewTask) -> OrchestratorResult<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let now = Utc::now();
        let task = Task {
            id: *next_id,
            task_type: new_task.task_type.as_str().to_string(),
            payload: new_task.payload.clone(),
            priority: new_task.priority,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_by: new_task.created_by.clone(),
            result: None,
            retry_count: 0,
            max_retries: new_task.max_retries,
            timeout_seconds: new_task.timeout_seconds,
            scheduled_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        *next_id += 1;
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let mut matched: Vec<Task> = tasks
            .values()
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| {
                filter
                    .task_type
                    .as_ref()
                    .is_none_or(|tt| &t.task_type == tt)
            })
            .filter(|t| {
                filter
                    .created_by
                    .as_ref()
                    .is_none_or(|c| &t.created_by == c)
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = filter.offset.unwrap_or(0) as usize;
        let limit = filter.limit.unwrap_or(100) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    /// 认领在一个互斥锁临界区内完成，与数据库行锁等价
    async fn claim_next(
        &self,
        agent_id: &str,
        capabilities: &[Capability],
        aging_window_seconds: i64,
    ) -> OrchestratorResult<Option<Task>> {
        if capabilities.is_empty() {
            return Ok(None);
        }
        let mut tasks = self.tasks.lock().unwrap();
        let now = Utc::now();

        let mut candidates: Vec<&Task> = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.scheduled_at <= now)
            .filter(|t| capabilities.iter().any(|c| c.as_str() == t.task_type))
            .collect();
        candidates.sort_by(|a, b| {
            b.effective_priority(now, aging_window_seconds)
                .cmp(&a.effective_priority(now, aging_window_seconds))
                .then(a.created_at.cmp(&b.created_at))
        });

        let Some(id) = candidates.first().map(|t| t.id) else {
            return Ok(None);
        };
        let task = tasks.get_mut(&id).ok_or_else(|| {
            OrchestratorError::task_not_found(id)
        })?;
        task.status = TaskStatus::Running;
        task.assigned_agent_id = Some(agent_id.to_string());
        task.started_at = Some(now);
        Ok(Some(task.clone()))
    }

    async fn complete(&self, id: i64, result: serde_json::Value) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                task.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: i64, failure: &TaskFailure) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.status = TaskStatus::Failed;
                task.result = Some(failure.to_result_value());
                task.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, id: i64, delay: Duration) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Failed && task.can_retry() => {
                task.status = TaskStatus::Pending;
                task.retry_count += 1;
                task.assigned_agent_id = None;
                task.started_at = None;
                task.completed_at = None;
                task.scheduled_at = Utc::now() + delay;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_dead_letter(&self, id: i64) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Failed => {
                task.status = TaskStatus::DeadLetter;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel(&self, id: i64) -> OrchestratorResult<bool> {
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_by_agent_id(&self, agent_id: &str, limit: i64) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.assigned_agent_id.as_deref() == Some(agent_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_running(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Running)
            .cloned()
            .collect())
    }

    async fn get_timeout_tasks(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        let now = Utc::now();
        Ok(tasks
            .values()
            .filter(|t| t.is_timed_out(now))
            .cloned()
            .collect())
    }

    async fn get_failed(&self) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .cloned()
            .collect())
    }

    async fn list_dead_letter(&self, limit: i64) -> OrchestratorResult<Vec<Task>> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::DeadLetter)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_unmatched_pending(
        &self,
        capabilities: &[Capability],
    ) -> OrchestratorResult<i64> {
        let tasks = self.tasks.lock().unwrap();
        let now = Utc::now();
        Ok(tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.scheduled_at <= now)
            .filter(|t| !capabilities.iter().any(|c| c.as_str() == t.task_type))
            .count() as i64)
    }

    async fn queue_stats(&self) -> OrchestratorResult<QueueStats> {
        let tasks = self.tasks.lock().unwrap();
        let mut stats = QueueStats::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::DeadLetter => stats.dead_letter += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}

/// In-memory AgentRepository mock
#[derive(Debug, Clone, Default)]
pub struct MockAgentRepository {
    agents: Arc<Mutex<HashMap<String, AgentInfo>>>,
}

impl MockAgentRepository {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_agents(agents: Vec<AgentInfo>) -> Self {
        let map = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        Self {
            agents: Arc::new(Mutex::new(map)),
        }
    }

    pub fn insert(&self, agent: AgentInfo) {
        self.agents.lock().unwrap().insert(agent.id.clone(), agent);
    }

    pub fn get_all(&self) -> Vec<AgentInfo> {
        self.agents.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl AgentRepository for MockAgentRepository {
    async fn register(&self, registration: &AgentRegistration) -> OrchestratorResult<AgentInfo> {
        let mut agents = self.agents.lock().unwrap();
        let now = Utc::now();

        // 幂等注册：同名同类型的Agent保留原id
        let existing_id = agents
            .values()
            .find(|a| a.name == registration.name && a.agent_type == registration.agent_type)
            .map(|a| a.id.clone());

        let agent = match existing_id {
            Some(id) => {
                let agent = agents.get_mut(&id).ok_or_else(|| {
                    OrchestratorError::agent_not_found(&id)
                })?;
                agent.capabilities = registration.capabilities.clone();
                agent.status = AgentStatus::Stopped;
                agent.metadata = registration.metadata.clone();
                agent.clone()
            }
            None => {
                let agent = AgentInfo {
                    id: Uuid::new_v4().to_string(),
                    name: registration.name.clone(),
                    agent_type: registration.agent_type.clone(),
                    capabilities: registration.capabilities.clone(),
                    status: AgentStatus::Stopped,
                    last_heartbeat: now,
                    registered_at: now,
                    metadata: registration.metadata.clone(),
                };
                agents.insert(agent.id.clone(), agent.clone());
                agent
            }
        };
        Ok(agent)
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<AgentInfo>> {
        Ok(self.agents.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> OrchestratorResult<Vec<AgentInfo>> {
        Ok(self.agents.lock().unwrap().values().cloned().collect())
    }

    async fn update_status(&self, id: &str, status: AgentStatus) -> OrchestratorResult<()> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::agent_not_found(id))?;

        if !agent.status.can_transition_to(status) {
            return Err(OrchestratorError::InvalidTransition {
                from: agent.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        agent.status = status;
        Ok(())
    }

    async fn heartbeat(
        &self,
        id: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<AgentInfo> {
        let mut agents = self.agents.lock().unwrap();
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::agent_not_found(id))?;

        agent.last_heartbeat = Utc::now();
        agent.metadata = metadata;
        if matches!(agent.status, AgentStatus::Starting | AgentStatus::Degraded) {
            agent.status = AgentStatus::Running;
        }
        Ok(agent.clone())
    }

    async fn find_eligible(&self, capability: &Capability) -> OrchestratorResult<Vec<AgentInfo>> {
        let agents = self.agents.lock().unwrap();
        Ok(agents
            .values()
            .filter(|a| a.status.is_eligible() && a.has_capability(capability))
            .cloned()
            .collect())
    }

    async fn list_eligible(&self) -> OrchestratorResult<Vec<AgentInfo>> {
        let agents = self.agents.lock().unwrap();
        Ok(agents
            .values()
            .filter(|a| a.status.is_eligible())
            .cloned()
            .collect())
    }

    async fn get_stale(&self, threshold_seconds: i64) -> OrchestratorResult<Vec<AgentInfo>> {
        let agents = self.agents.lock().unwrap();
        let now = Utc::now();
        Ok(agents
            .values()
            .filter(|a| {
                matches!(
                    a.status,
                    AgentStatus::Starting | AgentStatus::Running | AgentStatus::Degraded
                )
            })
            .filter(|a| a.is_heartbeat_stale(now, threshold_seconds))
            .cloned()
            .collect())
    }
}
