use std::sync::Arc;

use tracing::{debug, info};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    NewTask, QueueStats, Task, TaskRepository, TaskStatus, TaskStatusView,
};

/// 生产者契约
///
/// 任务提交方看到的全部接口：提交、查询、取消、死信检视与重投。
pub struct ProducerClient {
    task_repo: Arc<dyn TaskRepository>,
}

impl ProducerClient {
    pub fn new(task_repo: Arc<dyn TaskRepository>) -> Self {
        Self { task_repo }
    }

    /// 提交新任务，返回任务id
    pub async fn create_task(&self, new_task: NewTask) -> OrchestratorResult<i64> {
        if new_task.max_retries < 0 || new_task.timeout_seconds <= 0 {
            return Err(OrchestratorError::InvalidTaskParams(
                "max_retries不能为负，timeout_seconds必须大于0".to_string(),
            ));
        }
        let task = self.task_repo.create(&new_task).await?;
        info!("任务已提交: id={} 类型={}", task.id, task.task_type);
        Ok(task.id)
    }

    /// 查询任务状态视图
    pub async fn get_task_status(&self, id: i64) -> OrchestratorResult<TaskStatusView> {
        let task = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(id))?;
        Ok(task.status_view())
    }

    /// 取消任务；只有pending任务可取消，运行中任务不可抢占
    pub async fn cancel_task(&self, id: i64) -> OrchestratorResult<bool> {
        let cancelled = self.task_repo.cancel(id).await?;
        if cancelled {
            info!("任务已取消: id={}", id);
        } else {
            debug!("任务 {} 不在pending状态，取消被拒绝", id);
        }
        Ok(cancelled)
    }

    /// 死信队列检视
    pub async fn list_dead_letter(&self, limit: i64) -> OrchestratorResult<Vec<Task>> {
        self.task_repo.list_dead_letter(limit).await
    }

    /// 重投死信任务：复制类型/payload/优先级创建一个全新任务
    ///
    /// 原死信任务保持不动，供审计追溯。
    pub async fn resubmit(&self, id: i64) -> OrchestratorResult<i64> {
        let task = self
            .task_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::task_not_found(id))?;
        if task.status != TaskStatus::DeadLetter {
            return Err(OrchestratorError::InvalidTaskParams(format!(
                "任务 {} 不在死信队列，不能重投",
                id
            )));
        }

        let task_type = task.task_type.parse()?;
        let new_task = NewTask::new(task_type, task.payload.clone(), &task.created_by)
            .with_priority(task.priority)
            .with_max_retries(task.max_retries)
            .with_timeout_seconds(task.timeout_seconds);
        let created = self.task_repo.create(&new_task).await?;
        info!("死信任务 {} 已重投为新任务 {}", id, created.id);
        Ok(created.id)
    }

    /// 队列统计快照
    pub async fn queue_stats(&self) -> OrchestratorResult<QueueStats> {
        self.task_repo.queue_stats().await
    }
}
