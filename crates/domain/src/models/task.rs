use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Capability;

/// 任务定义
///
/// 表示一次可派发执行的工作单元。payload对编排核心完全不透明，
/// 由认领任务的Agent自行解释。
///
/// # 字段说明
///
/// - `id`: 任务的唯一标识符（数据库生成）
/// - `task_type`: 任务类型，与Agent能力标签匹配
/// - `payload`: 任务参数，JSON格式，核心不解释
/// - `priority`: 优先级，数值越大越紧急
/// - `status`: 任务生命周期状态
/// - `assigned_agent_id`: 认领该任务的Agent，认领前为空
/// - `created_by`: 任务提交方标识
/// - `result`: 执行结果或失败记录
/// - `retry_count` / `max_retries`: 重试计数与上限，恒有 retry_count <= max_retries
/// - `timeout_seconds`: 看门狗回收阈值
/// - `scheduled_at`: 最早可认领时间，重试退避通过它生效
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status: TaskStatus,
    pub assigned_agent_id: Option<String>,
    pub created_by: String,
    pub result: Option<serde_json::Value>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 任务状态
///
/// 生命周期：pending -> running -> completed，
/// 失败路径：running -> failed -> pending（重试）或 dead_letter（耗尽），
/// pending任务可被取消为cancelled。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "dead_letter")]
    DeadLetter,
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::DeadLetter => "dead_letter",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// 终态任务不再参与调度，仅供查询审计
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::DeadLetter | TaskStatus::Cancelled
        )
    }

    /// 状态机合法转换校验
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Pending)
                | (Failed, DeadLetter)
        )
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "dead_letter" => Ok(TaskStatus::DeadLetter),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(format!("Invalid task status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 新任务提交参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: Capability,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub created_by: String,
}

impl NewTask {
    pub fn new(task_type: Capability, payload: serde_json::Value, created_by: &str) -> Self {
        Self {
            task_type,
            payload,
            priority: 0,
            max_retries: 3,
            timeout_seconds: 300,
            created_by: created_by.to_string(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_seconds(mut self, timeout_seconds: i32) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }
}

/// 任务过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    pub created_by: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// 面向生产者的任务状态视图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub id: i64,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub retry_count: i32,
}

/// 队列统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub cancelled: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.dead_letter
            + self.cancelled
    }

    pub fn active(&self) -> i64 {
        self.pending + self.running
    }
}

impl Task {
    /// 检查任务是否还会被调度
    pub fn is_active(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 是否还有重试额度
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// 计算有效优先级: priority + floor(等待秒数 / 老化窗口)
    ///
    /// 等待越久优先级越高，低优先级任务不会被持续到来的
    /// 高优先级任务无限饿死。
    pub fn effective_priority(&self, now: DateTime<Utc>, aging_window_seconds: i64) -> i64 {
        let waited = (now - self.scheduled_at).num_seconds().max(0);
        self.priority as i64 + waited / aging_window_seconds.max(1)
    }

    /// 运行中任务是否已超过看门狗阈值
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Running {
            return false;
        }
        match self.started_at {
            Some(started) => (now - started).num_seconds() > self.timeout_seconds as i64,
            None => false,
        }
    }

    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            id: self.id,
            status: self.status,
            result: self.result.clone(),
            retry_count: self.retry_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: 1,
            task_type: "scrape".to_string(),
            payload: serde_json::json!({"url": "https://example.com"}),
            priority: 5,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            created_by: "producer-1".to_string(),
            result: None,
            retry_count: 0,
            max_retries: 3,
            timeout_seconds: 300,
            scheduled_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn test_status_transitions() {
        use TaskStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(DeadLetter));

        // 终态不可再转换
        assert!(!Completed.can_transition_to(Running));
        assert!(!DeadLetter.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Running));
        // 运行中任务不可直接取消
        assert!(!Running.can_transition_to(Cancelled));
    }

    #[test]
    fn test_effective_priority_ages_with_wait() {
        let now = Utc::now();
        let mut task = sample_task();
        task.priority = 1;
        task.scheduled_at = now - Duration::seconds(300);

        // 等待300秒，老化窗口60秒 => +5
        assert_eq!(task.effective_priority(now, 60), 6);
        // 刚入队的任务没有加成
        task.scheduled_at = now;
        assert_eq!(task.effective_priority(now, 60), 1);
    }

    #[test]
    fn test_watchdog_timeout_detection() {
        let now = Utc::now();
        let mut task = sample_task();
        task.status = TaskStatus::Running;
        task.timeout_seconds = 60;
        task.started_at = Some(now - Duration::seconds(120));
        assert!(task.is_timed_out(now));

        task.started_at = Some(now - Duration::seconds(30));
        assert!(!task.is_timed_out(now));

        // 非运行状态不受看门狗影响
        task.status = TaskStatus::Pending;
        task.started_at = Some(now - Duration::seconds(600));
        assert!(!task.is_timed_out(now));
    }

    #[test]
    fn test_retry_budget() {
        let mut task = sample_task();
        assert!(task.can_retry());
        task.retry_count = 3;
        assert!(!task.can_retry());
    }
}
