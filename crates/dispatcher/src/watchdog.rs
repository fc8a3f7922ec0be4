use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{TaskFailure, TaskRepository};

use crate::retry_service::FailureHandler;

/// 执行超时看门狗
///
/// 周期扫描运行时长超过自身timeout_seconds的任务，按瞬时失败
/// 路由进失败管理器。依赖mark_failed的running守卫，与迟到的
/// Agent完成上报竞争时只有一方生效。
pub struct TimeoutWatchdog {
    task_repo: Arc<dyn TaskRepository>,
    failure_handler: Arc<dyn FailureHandler>,
    sweep_interval: Duration,
}

impl TimeoutWatchdog {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        failure_handler: Arc<dyn FailureHandler>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            task_repo,
            failure_handler,
            sweep_interval,
        }
    }

    /// 单次扫描，返回回收的任务数
    pub async fn sweep(&self) -> OrchestratorResult<usize> {
        let timed_out = self.task_repo.get_timeout_tasks().await?;
        if timed_out.is_empty() {
            return Ok(0);
        }

        warn!("看门狗发现 {} 个超时任务", timed_out.len());
        let mut reclaimed = 0;
        for task in &timed_out {
            let mut failure = TaskFailure::timeout(task.timeout_seconds);
            if let Some(agent_id) = &task.assigned_agent_id {
                failure = failure.with_agent(agent_id);
            }
            match self.failure_handler.handle_failure(task, &failure).await {
                Ok(()) => reclaimed += 1,
                Err(e) => error!("回收超时任务 {} 失败: {}", task.id, e),
            }
        }
        Ok(reclaimed)
    }

    /// 看门狗主循环，收到关闭信号后退出
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            "超时看门狗已启动，扫描间隔 {} 秒",
            self.sweep_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("看门狗扫描出错: {}", e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("收到关闭信号，超时看门狗退出");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use orchestrator_core::config::RetryPolicyConfig;
    use orchestrator_domain::TaskStatus;
    use orchestrator_infrastructure::MetricsCollector;
    use orchestrator_testing_utils::{MockTaskRepository, TaskBuilder};

    use crate::retry_service::TaskFailureHandler;

    fn watchdog(repo: Arc<MockTaskRepository>) -> TimeoutWatchdog {
        let handler = Arc::new(TaskFailureHandler::new(
            repo.clone(),
            RetryPolicyConfig {
                jitter_factor: 0.0,
                ..Default::default()
            },
            Arc::new(MetricsCollector::new()),
        ));
        TimeoutWatchdog::new(repo, handler, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_over_timeout_tasks() {
        let now = Utc::now();
        let overdue = TaskBuilder::new()
            .with_id(1)
            .with_status(TaskStatus::Running)
            .with_assigned_agent("agent-1")
            .with_timeout_seconds(60)
            .with_started_at(now - ChronoDuration::seconds(120))
            .build();
        let in_flight = TaskBuilder::new()
            .with_id(2)
            .with_status(TaskStatus::Running)
            .with_assigned_agent("agent-2")
            .with_timeout_seconds(300)
            .with_started_at(now - ChronoDuration::seconds(30))
            .build();

        let repo = Arc::new(MockTaskRepository::with_tasks(vec![overdue, in_flight]));
        let reclaimed = watchdog(repo.clone()).sweep().await.unwrap();
        assert_eq!(reclaimed, 1);

        // 超时任务按瞬时失败重试入队，失败记录带超时原因
        let reclaimed_task = repo.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(reclaimed_task.status, TaskStatus::Pending);
        assert_eq!(reclaimed_task.retry_count, 1);

        // 未超时的任务不受影响
        let untouched = repo.get_by_id(2).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskStatus::Running);
        assert_eq!(untouched.assigned_agent_id.as_deref(), Some("agent-2"));
    }

    #[tokio::test]
    async fn test_sweep_with_no_timeouts_is_noop() {
        let repo = Arc::new(MockTaskRepository::new());
        assert_eq!(watchdog(repo).sweep().await.unwrap(), 0);
    }
}
