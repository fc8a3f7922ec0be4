use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::HealthMonitorConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    AgentInfo, AgentRepository, AgentStatus, TaskFailure, TaskRepository, TaskStatus,
};
use orchestrator_infrastructure::{EligibleAgentCache, MetricsCollector};

/// Agent健康扫描
///
/// 心跳缺失超过阈值的Agent降级，超过两倍阈值标记为不健康；
/// 不健康再经过宽限期（容忍短暂网络分区）后回收其在途任务。
/// 不健康的Agent保留在注册表里供审计，不会被删除。
pub struct AgentFailureDetector {
    agent_repo: Arc<dyn AgentRepository>,
    task_repo: Arc<dyn TaskRepository>,
    failure_handler: Arc<dyn crate::retry_service::FailureHandler>,
    agent_cache: Arc<EligibleAgentCache>,
    config: HealthMonitorConfig,
    metrics: Arc<MetricsCollector>,
}

impl AgentFailureDetector {
    pub fn new(
        agent_repo: Arc<dyn AgentRepository>,
        task_repo: Arc<dyn TaskRepository>,
        failure_handler: Arc<dyn crate::retry_service::FailureHandler>,
        agent_cache: Arc<EligibleAgentCache>,
        config: HealthMonitorConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            agent_repo,
            task_repo,
            failure_handler,
            agent_cache,
            config,
            metrics,
        }
    }

    /// 单次健康扫描：降级、标记不健康、回收失联Agent的任务
    pub async fn sweep(&self) -> OrchestratorResult<()> {
        self.demote_stale_agents().await?;
        self.reclaim_abandoned_tasks().await?;
        Ok(())
    }

    async fn demote_stale_agents(&self) -> OrchestratorResult<()> {
        let now = Utc::now();
        let stale = self
            .agent_repo
            .get_stale(self.config.heartbeat_timeout_seconds)
            .await?;
        if stale.is_empty() {
            return Ok(());
        }

        let mut demoted = false;
        for agent in &stale {
            let unhealthy_threshold = 2 * self.config.heartbeat_timeout_seconds;
            let target = if agent.is_heartbeat_stale(now, unhealthy_threshold) {
                AgentStatus::Unhealthy
            } else {
                AgentStatus::Degraded
            };
            if agent.status == target {
                continue;
            }
            // degraded -> unhealthy 要走中间态，直接跳级会被状态机拒绝
            if target == AgentStatus::Unhealthy && agent.status != AgentStatus::Degraded {
                match self
                    .agent_repo
                    .update_status(&agent.id, AgentStatus::Degraded)
                    .await
                {
                    Ok(()) => {}
                    Err(e) => {
                        warn!("降级Agent {} 失败: {}", agent.id, e);
                        continue;
                    }
                }
            }
            match self.agent_repo.update_status(&agent.id, target).await {
                Ok(()) => {
                    demoted = true;
                    match target {
                        AgentStatus::Unhealthy => self.metrics.record_agent_unhealthy(&agent.id),
                        _ => self.metrics.record_agent_degraded(&agent.id),
                    }
                }
                Err(e) => warn!("变更Agent {} 状态失败: {}", agent.id, e),
            }
        }

        if demoted {
            // 降级的Agent不应再出现在派发侧的匹配集合里
            self.agent_cache.invalidate().await;
        }
        Ok(())
    }

    /// 回收不健康且已过宽限期的Agent上的在途任务
    async fn reclaim_abandoned_tasks(&self) -> OrchestratorResult<()> {
        let now = Utc::now();
        let reclaim_threshold =
            2 * self.config.heartbeat_timeout_seconds + self.config.grace_period_seconds;

        let agents = self.agent_repo.list().await?;
        for agent in agents
            .iter()
            .filter(|a| a.status == AgentStatus::Unhealthy)
            .filter(|a| a.is_heartbeat_stale(now, reclaim_threshold))
        {
            if let Err(e) = self.reclaim_agent_tasks(agent).await {
                error!("回收Agent {} 的任务失败: {}", agent.id, e);
            }
        }
        Ok(())
    }

    async fn reclaim_agent_tasks(&self, agent: &AgentInfo) -> OrchestratorResult<()> {
        let tasks = self.task_repo.get_by_agent_id(&agent.id, 1000).await?;
        let running: Vec<_> = tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Running)
            .collect();
        if running.is_empty() {
            debug!("失联Agent {} 没有在途任务", agent.id);
            return Ok(());
        }

        info!(
            "回收失联Agent {} 的 {} 个在途任务",
            agent.id,
            running.len()
        );
        for task in &running {
            let failure = TaskFailure::agent_unavailable(&agent.id);
            if let Err(e) = self.failure_handler.handle_failure(task, &failure).await {
                error!("回收任务 {} 失败: {}", task.id, e);
            }
        }
        Ok(())
    }

    /// 健康扫描主循环
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "Agent健康扫描已启动，间隔 {} 秒，心跳阈值 {} 秒",
            self.config.sweep_interval_seconds, self.config.heartbeat_timeout_seconds
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Agent健康扫描出错: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，Agent健康扫描退出");
                    break;
                }
            }
        }
    }
}
