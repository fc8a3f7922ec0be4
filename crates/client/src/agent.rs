use std::sync::Arc;

use tracing::{debug, info};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    AgentInfo, AgentRegistration, AgentRepository, AgentStatus, Task, TaskFailure, TaskRepository,
};

/// Agent契约
///
/// Agent侧看到的全部接口：注册、心跳、拉取认领、完成与失败上报。
/// 认领是存储层的原子原语，同一任务绝不会发给两个Agent。
pub struct AgentClient {
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    aging_window_seconds: i64,
}

impl AgentClient {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_repo: Arc<dyn AgentRepository>,
        aging_window_seconds: i64,
    ) -> Self {
        Self {
            task_repo,
            agent_repo,
            aging_window_seconds,
        }
    }

    /// 注册Agent，幂等；能力集不能为空
    pub async fn register(
        &self,
        registration: AgentRegistration,
    ) -> OrchestratorResult<AgentInfo> {
        if registration.capabilities.is_empty() {
            return Err(OrchestratorError::validation_error(
                "Agent必须至少声明一个能力",
            ));
        }
        let agent = self.agent_repo.register(&registration).await?;
        info!(
            "Agent已注册: id={} name={} 能力数={}",
            agent.id,
            agent.name,
            agent.capabilities.len()
        );
        Ok(agent)
    }

    /// Agent生命周期状态变更
    pub async fn update_status(&self, agent_id: &str, status: AgentStatus) -> OrchestratorResult<()> {
        self.agent_repo.update_status(agent_id, status).await
    }

    /// 拉取认领下一个任务
    ///
    /// 按Agent注册的能力集原子认领；Agent不在running状态时
    /// 不参与匹配，返回None。
    pub async fn claim_task(&self, agent_id: &str) -> OrchestratorResult<Option<Task>> {
        let agent = self
            .agent_repo
            .get_by_id(agent_id)
            .await?
            .ok_or_else(|| OrchestratorError::agent_not_found(agent_id))?;

        if !agent.status.is_eligible() {
            debug!(
                "Agent {} 状态为 {}，不参与任务认领",
                agent_id,
                agent.status.as_str()
            );
            return Ok(None);
        }

        self.task_repo
            .claim_next(agent_id, &agent.capabilities, self.aging_window_seconds)
            .await
    }

    /// 心跳上报，携带当前负载等metadata
    pub async fn report_heartbeat(
        &self,
        agent_id: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<AgentInfo> {
        self.agent_repo.heartbeat(agent_id, metadata).await
    }

    /// 成功完成上报；任务已不在running状态时返回false且不覆盖任何东西
    pub async fn complete_task(
        &self,
        task_id: i64,
        result: serde_json::Value,
    ) -> OrchestratorResult<bool> {
        let completed = self.task_repo.complete(task_id, result).await?;
        if completed {
            debug!("任务 {} 完成上报成功", task_id);
        } else {
            debug!("任务 {} 已处于终态，完成上报被忽略", task_id);
        }
        Ok(completed)
    }

    /// 失败上报
    ///
    /// 只负责把失败记录落盘为failed状态，重试/死信的裁决
    /// 由调度侧的失败管理器完成。
    pub async fn fail_task(
        &self,
        task_id: i64,
        error: &str,
        permanent: bool,
    ) -> OrchestratorResult<bool> {
        let failure = if permanent {
            TaskFailure::permanent(error)
        } else {
            TaskFailure::transient(error)
        };
        self.task_repo.mark_failed(task_id, &failure).await
    }
}
