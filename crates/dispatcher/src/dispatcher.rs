use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::DispatcherConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{AgentInfo, Capability, Task, TaskFailure, TaskRepository};
use orchestrator_infrastructure::{EligibleAgentCache, MetricsCollector};

use crate::retry_service::FailureHandler;

/// 任务投递通道
///
/// 派发循环替Agent认领任务后的交付出口。进程内部署用channel投递，
/// 纯拉取部署不配置投递通道，Agent自己认领。
#[async_trait]
pub trait TaskDelivery: Send + Sync {
    async fn deliver(&self, agent: &AgentInfo, task: &Task) -> OrchestratorResult<()>;
}

/// 任务派发器
///
/// 每个周期：刷新可匹配Agent集合、上报队列水位、按容量余量
/// 替Agent原子认领并投递。认领本身是数据库里的条件更新，
/// 多个派发副本并行运行不会重复派发。
pub struct TaskDispatcher {
    task_repo: Arc<dyn TaskRepository>,
    agent_cache: Arc<EligibleAgentCache>,
    failure_handler: Arc<dyn FailureHandler>,
    delivery: Option<Arc<dyn TaskDelivery>>,
    config: DispatcherConfig,
    metrics: Arc<MetricsCollector>,
}

impl TaskDispatcher {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        agent_cache: Arc<EligibleAgentCache>,
        failure_handler: Arc<dyn FailureHandler>,
        config: DispatcherConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            agent_cache,
            failure_handler,
            delivery: None,
            config,
            metrics,
        }
    }

    /// 配置投递通道，启用替Agent认领
    pub fn with_delivery(mut self, delivery: Arc<dyn TaskDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Agent的并发容量余量，心跳metadata缺失时按1处理
    fn remaining_capacity(agent: &AgentInfo) -> i64 {
        let max = agent
            .metadata
            .get("max_concurrent_tasks")
            .and_then(|v| v.as_i64())
            .unwrap_or(1);
        (max - agent.current_task_count()).max(0)
    }

    /// 单个派发周期，返回认领的任务数
    pub async fn dispatch_cycle(&self) -> OrchestratorResult<usize> {
        let started = Instant::now();

        let agents = self.agent_cache.get().await?;
        self.metrics.record_eligible_agents(agents.len());

        // 没有任何可匹配Agent的待执行任务只计入指标，不报错
        let mut seen = std::collections::HashSet::new();
        let all_capabilities: Vec<Capability> = agents
            .iter()
            .flat_map(|a| a.capabilities.iter().cloned())
            .filter(|c| seen.insert(c.clone()))
            .collect();
        let unmatched = self
            .task_repo
            .count_unmatched_pending(&all_capabilities)
            .await?;
        self.metrics.record_unmatched_pending(unmatched);
        if unmatched > 0 {
            debug!("{} 个待执行任务当前没有可匹配的Agent", unmatched);
        }

        let stats = self.task_repo.queue_stats().await?;
        self.metrics.record_queue_stats(&stats);

        // Agent上报的失败停留在failed状态，由这里裁决重试或死信
        self.failure_handler.recover_lingering_failures().await?;

        let claimed = match &self.delivery {
            Some(delivery) => self.claim_for_agents(&agents, delivery.as_ref()).await?,
            None => 0,
        };

        self.metrics
            .record_dispatch_cycle(started.elapsed().as_secs_f64());
        Ok(claimed)
    }

    async fn claim_for_agents(
        &self,
        agents: &[AgentInfo],
        delivery: &dyn TaskDelivery,
    ) -> OrchestratorResult<usize> {
        let mut claimed = 0;

        // 负载低的Agent优先拿到任务
        let mut ordered: Vec<&AgentInfo> = agents.iter().collect();
        ordered.sort_by_key(|a| a.current_task_count());

        for agent in ordered {
            let capacity = Self::remaining_capacity(agent);
            for _ in 0..capacity {
                if claimed >= self.config.max_claims_per_cycle {
                    return Ok(claimed);
                }
                let task = self
                    .task_repo
                    .claim_next(
                        &agent.id,
                        &agent.capabilities,
                        self.config.aging_window_seconds as i64,
                    )
                    .await?;
                let Some(task) = task else {
                    break;
                };
                self.metrics.record_task_claimed(&task.task_type, &agent.id);

                if let Err(e) = delivery.deliver(agent, &task).await {
                    // 投递失败按Agent失联处理，任务回到重试路径
                    warn!("向Agent {} 投递任务 {} 失败: {}", agent.id, task.id, e);
                    let failure = TaskFailure::agent_unavailable(&agent.id);
                    self.failure_handler.handle_failure(&task, &failure).await?;
                } else {
                    claimed += 1;
                }
            }
        }
        Ok(claimed)
    }

    /// 派发主循环
    ///
    /// 存储瞬时故障按指数退避重试，不会让循环退出。
    pub async fn run(&self, mut shutdown_rx: tokio::sync::broadcast::Receiver<()>) {
        info!(
            "派发循环已启动，轮询间隔 {} 秒",
            self.config.poll_interval_seconds
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut consecutive_failures: u32 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.dispatch_cycle().await {
                        Ok(claimed) => {
                            consecutive_failures = 0;
                            if claimed > 0 {
                                debug!("本周期认领 {} 个任务", claimed);
                            }
                        }
                        Err(e) if e.is_retryable() => {
                            consecutive_failures += 1;
                            let backoff = self.store_backoff(consecutive_failures);
                            self.metrics.record_store_retry();
                            warn!(
                                "派发周期存储故障（连续第 {} 次），{} 毫秒后重试: {}",
                                consecutive_failures,
                                backoff.as_millis(),
                                e
                            );
                            tokio::time::sleep(backoff).await;
                        }
                        Err(e) => {
                            error!("派发周期出错: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，派发循环退出");
                    break;
                }
            }
        }
    }

    fn store_backoff(&self, consecutive_failures: u32) -> Duration {
        let exp = self
            .config
            .store_retry_base_ms
            .saturating_mul(1u64 << consecutive_failures.saturating_sub(1).min(16));
        Duration::from_millis(exp.min(self.config.store_retry_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use orchestrator_core::config::RetryPolicyConfig;
    use orchestrator_domain::TaskStatus;
    use orchestrator_testing_utils::{
        AgentBuilder, MockAgentRepository, MockTaskRepository, TaskBuilder,
    };

    use crate::retry_service::TaskFailureHandler;

    struct RecordingDelivery {
        delivered: std::sync::Mutex<Vec<(String, i64)>>,
    }

    #[async_trait]
    impl TaskDelivery for RecordingDelivery {
        async fn deliver(&self, agent: &AgentInfo, task: &Task) -> OrchestratorResult<()> {
            self.delivered
                .lock()
                .unwrap()
                .push((agent.id.clone(), task.id));
            Ok(())
        }
    }

    struct FailingDelivery;

    #[async_trait]
    impl TaskDelivery for FailingDelivery {
        async fn deliver(&self, agent: &AgentInfo, _task: &Task) -> OrchestratorResult<()> {
            Err(orchestrator_core::OrchestratorError::AgentUnavailable {
                capability: agent.agent_type.clone(),
            })
        }
    }

    fn dispatcher(
        task_repo: Arc<MockTaskRepository>,
        agent_repo: Arc<MockAgentRepository>,
        delivery: Arc<dyn TaskDelivery>,
    ) -> TaskDispatcher {
        let metrics = Arc::new(MetricsCollector::new());
        let handler = Arc::new(TaskFailureHandler::new(
            task_repo.clone(),
            RetryPolicyConfig {
                jitter_factor: 0.0,
                ..Default::default()
            },
            metrics.clone(),
        ));
        let cache = Arc::new(EligibleAgentCache::new(
            agent_repo,
            Duration::from_secs(0),
        ));
        TaskDispatcher::new(
            task_repo,
            cache,
            handler,
            DispatcherConfig::default(),
            metrics,
        )
        .with_delivery(delivery)
    }

    fn agent_with_capacity(id: &str, capacity: i64) -> orchestrator_domain::AgentInfo {
        AgentBuilder::new()
            .with_id(id)
            .with_metadata(serde_json::json!({
                "max_concurrent_tasks": capacity,
                "current_task_count": 0,
            }))
            .build()
    }

    #[tokio::test]
    async fn test_higher_priority_claimed_first() {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![
            TaskBuilder::new().with_id(1).with_priority(3).build(),
            TaskBuilder::new().with_id(2).with_priority(9).build(),
        ]));
        let agent_repo = Arc::new(MockAgentRepository::with_agents(vec![
            agent_with_capacity("agent-1", 1),
        ]));
        let delivery = Arc::new(RecordingDelivery {
            delivered: std::sync::Mutex::new(vec![]),
        });

        let claimed = dispatcher(task_repo.clone(), agent_repo, delivery.clone())
            .dispatch_cycle()
            .await
            .unwrap();
        assert_eq!(claimed, 1);
        assert_eq!(delivery.delivered.lock().unwrap()[0], ("agent-1".to_string(), 2));
    }

    #[tokio::test]
    async fn test_aged_low_priority_beats_fresh_high_priority() {
        let now = Utc::now();
        // priority 1 等了600秒，老化窗口60秒 => 有效优先级 11
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![
            TaskBuilder::new()
                .with_id(1)
                .with_priority(1)
                .with_scheduled_at(now - ChronoDuration::seconds(600))
                .with_created_at(now - ChronoDuration::seconds(600))
                .build(),
            TaskBuilder::new().with_id(2).with_priority(5).build(),
        ]));
        let agent_repo = Arc::new(MockAgentRepository::with_agents(vec![
            agent_with_capacity("agent-1", 1),
        ]));
        let delivery = Arc::new(RecordingDelivery {
            delivered: std::sync::Mutex::new(vec![]),
        });

        dispatcher(task_repo, agent_repo, delivery.clone())
            .dispatch_cycle()
            .await
            .unwrap();
        assert_eq!(delivery.delivered.lock().unwrap()[0].1, 1);
    }

    #[tokio::test]
    async fn test_no_capacity_no_claim() {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![
            TaskBuilder::new().with_id(1).build(),
        ]));
        let full_agent = AgentBuilder::new()
            .with_id("agent-1")
            .with_metadata(serde_json::json!({
                "max_concurrent_tasks": 2,
                "current_task_count": 2,
            }))
            .build();
        let agent_repo = Arc::new(MockAgentRepository::with_agents(vec![full_agent]));
        let delivery = Arc::new(RecordingDelivery {
            delivered: std::sync::Mutex::new(vec![]),
        });

        let claimed = dispatcher(task_repo.clone(), agent_repo, delivery)
            .dispatch_cycle()
            .await
            .unwrap();
        assert_eq!(claimed, 0);
        assert_eq!(
            task_repo.get_by_id(1).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_capability_mismatch_leaves_task_pending() {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![
            TaskBuilder::new().with_id(1).with_task_type("send-email").build(),
        ]));
        let agent_repo = Arc::new(MockAgentRepository::with_agents(vec![
            agent_with_capacity("agent-1", 1),
        ]));
        let delivery = Arc::new(RecordingDelivery {
            delivered: std::sync::Mutex::new(vec![]),
        });

        let claimed = dispatcher(task_repo.clone(), agent_repo, delivery)
            .dispatch_cycle()
            .await
            .unwrap();
        assert_eq!(claimed, 0);
        assert_eq!(
            task_repo.get_by_id(1).await.unwrap().unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_routes_to_retry_path() {
        let task_repo = Arc::new(MockTaskRepository::with_tasks(vec![
            TaskBuilder::new().with_id(1).build(),
        ]));
        let agent_repo = Arc::new(MockAgentRepository::with_agents(vec![
            agent_with_capacity("agent-1", 1),
        ]));

        let claimed = dispatcher(task_repo.clone(), agent_repo, Arc::new(FailingDelivery))
            .dispatch_cycle()
            .await
            .unwrap();
        assert_eq!(claimed, 0);

        // 投递失败的任务带着失联记录回到pending
        let task = task_repo.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.result.as_ref().unwrap()["kind"], "agent_unavailable");
    }

    #[test]
    fn test_store_backoff_is_capped() {
        let metrics = Arc::new(MetricsCollector::new());
        let task_repo = Arc::new(MockTaskRepository::new());
        let handler = Arc::new(TaskFailureHandler::new(
            task_repo.clone(),
            RetryPolicyConfig::default(),
            metrics.clone(),
        ));
        let cache = Arc::new(EligibleAgentCache::new(
            Arc::new(MockAgentRepository::new()),
            Duration::from_secs(0),
        ));
        let dispatcher = TaskDispatcher::new(
            task_repo,
            cache,
            handler,
            DispatcherConfig::default(),
            metrics,
        );

        assert_eq!(dispatcher.store_backoff(1), Duration::from_millis(100));
        assert_eq!(dispatcher.store_backoff(2), Duration::from_millis(200));
        assert_eq!(dispatcher.store_backoff(3), Duration::from_millis(400));
        // 封顶在store_retry_max_ms
        assert_eq!(dispatcher.store_backoff(20), Duration::from_millis(5000));
    }
}
