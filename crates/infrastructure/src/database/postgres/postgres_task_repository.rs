use async_trait::async_trait;
use chrono::Duration;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{
    Capability, NewTask, QueueStats, Task, TaskFailure, TaskFilter, TaskRepository, TaskStatus,
};

const TASK_COLUMNS: &str = "id, task_type, payload, priority, status, assigned_agent_id, \
     created_by, result, retry_count, max_retries, timeout_seconds, \
     scheduled_at, created_at, started_at, completed_at";

/// PostgreSQL任务仓储实现
///
/// 所有状态变更都是带守卫的条件更新，守卫不满足时返回false，
/// 多副本并发下的互斥完全由数据库保证。
pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 将数据库行转换为Task模型
    fn row_to_task(row: &sqlx::postgres::PgRow) -> OrchestratorResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            payload: row.try_get("payload")?,
            priority: row.try_get("priority")?,
            status: row.try_get("status")?,
            assigned_agent_id: row.try_get("assigned_agent_id")?,
            created_by: row.try_get("created_by")?,
            result: row.try_get("result")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            timeout_seconds: row.try_get("timeout_seconds")?,
            scheduled_at: row.try_get("scheduled_at")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn rows_to_tasks(rows: &[sqlx::postgres::PgRow]) -> OrchestratorResult<Vec<Task>> {
        rows.iter().map(Self::row_to_task).collect()
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type))]
    async fn create(&self, new_task: &NewTask) -> OrchestratorResult<Task> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO agent_tasks (task_type, payload, priority, created_by, max_retries, timeout_seconds)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(new_task.task_type.as_str())
        .bind(&new_task.payload)
        .bind(new_task.priority)
        .bind(&new_task.created_by)
        .bind(new_task.max_retries)
        .bind(new_task.timeout_seconds)
        .fetch_one(&self.pool)
        .await?;

        let task = Self::row_to_task(&row)?;
        debug!("创建任务成功: id={} 类型={}", task.id, task.task_type);
        Ok(task)
    }

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>> {
        let mut builder = sqlx::QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE 1=1"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(ref task_type) = filter.task_type {
            builder.push(" AND task_type = ").push_bind(task_type);
        }
        if let Some(ref created_by) = filter.created_by {
            builder.push(" AND created_by = ").push_bind(created_by);
        }
        builder.push(" ORDER BY created_at DESC");
        builder
            .push(" LIMIT ")
            .push_bind(filter.limit.unwrap_or(100));
        builder
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0));

        let rows = builder.build().fetch_all(&self.pool).await?;
        Self::rows_to_tasks(&rows)
    }

    /// 原子认领：选出有效优先级最高的可执行任务并置为running
    ///
    /// FOR UPDATE SKIP LOCKED让并发认领者各取各的行，
    /// 同一任务绝不会被派发两次。
    #[instrument(skip(self, capabilities), fields(agent_id = %agent_id))]
    async fn claim_next(
        &self,
        agent_id: &str,
        capabilities: &[Capability],
        aging_window_seconds: i64,
    ) -> OrchestratorResult<Option<Task>> {
        if capabilities.is_empty() {
            return Ok(None);
        }
        let capability_names: Vec<String> =
            capabilities.iter().map(|c| c.as_str().to_string()).collect();

        let row = sqlx::query(&format!(
            r#"
            UPDATE agent_tasks
            SET status = 'running', assigned_agent_id = $1, started_at = NOW()
            WHERE id = (
                SELECT id FROM agent_tasks
                WHERE status = 'pending'
                  AND scheduled_at <= NOW()
                  AND task_type = ANY($2)
                ORDER BY
                    priority + FLOOR(EXTRACT(EPOCH FROM (NOW() - scheduled_at)) / $3)::BIGINT DESC,
                    created_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(agent_id)
        .bind(&capability_names)
        .bind(aging_window_seconds.max(1))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let task = Self::row_to_task(&row)?;
                debug!("任务认领成功: id={} agent={}", task.id, agent_id);
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, result), fields(task_id = %id))]
    async fn complete(&self, id: i64, result: serde_json::Value) -> OrchestratorResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE agent_tasks
            SET status = 'completed', result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(&result)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self, failure), fields(task_id = %id))]
    async fn mark_failed(&self, id: i64, failure: &TaskFailure) -> OrchestratorResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE agent_tasks
            SET status = 'failed', result = $2, completed_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(failure.to_result_value())
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn requeue(&self, id: i64, delay: Duration) -> OrchestratorResult<bool> {
        let delay_seconds = delay.num_milliseconds().max(0) as f64 / 1000.0;
        let updated = sqlx::query(
            r#"
            UPDATE agent_tasks
            SET status = 'pending',
                retry_count = retry_count + 1,
                assigned_agent_id = NULL,
                started_at = NULL,
                completed_at = NULL,
                scheduled_at = NOW() + make_interval(secs => $2)
            WHERE id = $1 AND status = 'failed' AND retry_count < max_retries
            "#,
        )
        .bind(id)
        .bind(delay_seconds)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn mark_dead_letter(&self, id: i64) -> OrchestratorResult<bool> {
        let updated = sqlx::query(
            "UPDATE agent_tasks SET status = 'dead_letter' WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn cancel(&self, id: i64) -> OrchestratorResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE agent_tasks
            SET status = 'cancelled', completed_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn get_by_agent_id(&self, agent_id: &str, limit: i64) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM agent_tasks
            WHERE assigned_agent_id = $1
            ORDER BY started_at DESC NULLS LAST
            LIMIT $2
            "#,
        ))
        .bind(agent_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_tasks(&rows)
    }

    async fn get_running(&self) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE status = 'running'"
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_tasks(&rows)
    }

    async fn get_timeout_tasks(&self) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM agent_tasks
            WHERE status = 'running'
              AND started_at IS NOT NULL
              AND started_at + make_interval(secs => timeout_seconds::double precision) < NOW()
            "#,
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_tasks(&rows)
    }

    async fn get_failed(&self) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM agent_tasks WHERE status = 'failed' ORDER BY completed_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_tasks(&rows)
    }

    async fn list_dead_letter(&self, limit: i64) -> OrchestratorResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM agent_tasks
            WHERE status = 'dead_letter'
            ORDER BY completed_at DESC NULLS LAST
            LIMIT $1
            "#,
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_tasks(&rows)
    }

    async fn count_unmatched_pending(
        &self,
        capabilities: &[Capability],
    ) -> OrchestratorResult<i64> {
        let capability_names: Vec<String> =
            capabilities.iter().map(|c| c.as_str().to_string()).collect();

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM agent_tasks
            WHERE status = 'pending'
              AND scheduled_at <= NOW()
              AND NOT (task_type = ANY($1))
            "#,
        )
        .bind(&capability_names)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("count")?)
    }

    async fn queue_stats(&self) -> OrchestratorResult<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM agent_tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = QueueStats::default();
        for row in &rows {
            let status: TaskStatus = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match status {
                TaskStatus::Pending => stats.pending = count,
                TaskStatus::Running => stats.running = count,
                TaskStatus::Completed => stats.completed = count,
                TaskStatus::Failed => stats.failed = count,
                TaskStatus::DeadLetter => stats.dead_letter = count,
                TaskStatus::Cancelled => stats.cancelled = count,
            }
        }
        Ok(stats)
    }
}
