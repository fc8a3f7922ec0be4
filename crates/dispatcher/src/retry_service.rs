use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use rand::Rng;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::RetryPolicyConfig;
use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{FailureKind, Task, TaskFailure, TaskRepository};
use orchestrator_infrastructure::MetricsCollector;

/// 失败管理接口
///
/// 所有失败路径（Agent上报、看门狗超时、Agent失联回收）最终都
/// 汇入这里，由它裁决重试入队还是转入死信。
#[async_trait]
pub trait FailureHandler: Send + Sync {
    /// 处理一次运行中任务的失败
    ///
    /// 先把失败记录落盘（mark_failed），再按失败类别与重试额度裁决。
    /// 任务已不在running状态时什么都不做。
    async fn handle_failure(&self, task: &Task, failure: &TaskFailure) -> OrchestratorResult<()>;

    /// 恢复扫描：裁决器崩溃后遗留在failed状态的任务
    async fn recover_lingering_failures(&self) -> OrchestratorResult<usize>;

    /// 计算第 retry_count 次重试的退避延迟
    fn calculate_retry_delay(&self, retry_count: i32) -> Duration;
}

/// 基于指数退避的失败管理实现
pub struct TaskFailureHandler {
    task_repo: Arc<dyn TaskRepository>,
    policy: RetryPolicyConfig,
    metrics: Arc<MetricsCollector>,
}

impl TaskFailureHandler {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        policy: RetryPolicyConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            task_repo,
            policy,
            metrics,
        }
    }

    /// 对已处于failed状态的任务做重试/死信裁决
    ///
    /// `task` 是mark_failed之前的快照，retry_count尚未增加。
    async fn decide(&self, task: &Task, kind: FailureKind) -> OrchestratorResult<()> {
        if kind.is_permanent() {
            info!("任务 {} 永久失败，直接转入死信", task.id);
            self.move_to_dead_letter(task).await?;
            return Ok(());
        }

        if !task.can_retry() {
            info!(
                "任务 {} 重试额度耗尽 ({}/{})，转入死信",
                task.id, task.retry_count, task.max_retries
            );
            self.move_to_dead_letter(task).await?;
            return Ok(());
        }

        let delay = self.calculate_retry_delay(task.retry_count);
        let requeued = self.task_repo.requeue(task.id, delay).await?;
        if requeued {
            self.metrics
                .record_task_retried(&task.task_type, task.retry_count + 1);
            info!(
                "任务 {} 重试入队，第 {} 次重试，延迟 {} 秒",
                task.id,
                task.retry_count + 1,
                delay.num_seconds()
            );
        } else {
            // 守卫失败：并发裁决者已经处理过，或额度在竞争中耗尽
            warn!("任务 {} 重试入队被守卫拒绝，尝试转入死信", task.id);
            self.move_to_dead_letter(task).await?;
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, task: &Task) -> OrchestratorResult<()> {
        let moved = self.task_repo.mark_dead_letter(task.id).await?;
        if moved {
            self.metrics.record_task_dead_letter(&task.task_type);
        } else {
            debug!("任务 {} 已被并发裁决者处理，跳过死信转移", task.id);
        }
        Ok(())
    }

    /// 从任务result字段还原失败类别，供恢复扫描使用
    fn failure_kind_from_result(task: &Task) -> FailureKind {
        task.result
            .as_ref()
            .and_then(|r| r.get("kind"))
            .and_then(|k| serde_json::from_value(k.clone()).ok())
            .unwrap_or(FailureKind::Transient)
    }
}

#[async_trait]
impl FailureHandler for TaskFailureHandler {
    async fn handle_failure(&self, task: &Task, failure: &TaskFailure) -> OrchestratorResult<()> {
        // 失败原因先落盘，之后的任何崩溃都可以由恢复扫描接续
        let marked = self.task_repo.mark_failed(task.id, failure).await?;
        if !marked {
            debug!("任务 {} 已不在running状态，跳过失败处理", task.id);
            return Ok(());
        }
        self.metrics
            .record_task_failed(&task.task_type, &format!("{:?}", failure.kind));

        self.decide(task, failure.kind).await
    }

    async fn recover_lingering_failures(&self) -> OrchestratorResult<usize> {
        let lingering = self.task_repo.get_failed().await?;
        if lingering.is_empty() {
            return Ok(0);
        }

        info!("恢复扫描发现 {} 个待裁决的失败任务", lingering.len());
        let mut recovered = 0;
        for task in &lingering {
            let kind = Self::failure_kind_from_result(task);
            match self.decide(task, kind).await {
                Ok(()) => recovered += 1,
                Err(e) => error!("恢复失败任务 {} 时出错: {}", task.id, e),
            }
        }
        Ok(recovered)
    }

    fn calculate_retry_delay(&self, retry_count: i32) -> Duration {
        let base = self.policy.base_delay_seconds as f64;
        let capped = (base * self.policy.backoff_multiplier.powi(retry_count))
            .min(self.policy.max_delay_seconds as f64);

        let jitter = if self.policy.jitter_factor > 0.0 {
            let amplitude = capped * self.policy.jitter_factor;
            rand::rng().random_range(-amplitude..=amplitude)
        } else {
            0.0
        };

        Duration::milliseconds(((capped + jitter).max(0.0) * 1000.0) as i64)
    }
}
