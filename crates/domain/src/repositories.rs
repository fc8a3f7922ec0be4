//! 领域仓储抽象
//!
//! 定义数据访问的抽象接口。所有状态变更方法都是条件更新：
//! 守卫不满足时返回false或空结果而不是覆盖写入，
//! 多个Dispatcher副本之间的正确性完全依赖这些原语。

use async_trait::async_trait;
use chrono::Duration;

use orchestrator_core::OrchestratorResult;

use crate::models::{
    AgentInfo, AgentRegistration, AgentStatus, NewTask, QueueStats, Task, TaskFilter,
};
use crate::value_objects::{Capability, TaskFailure};

/// 任务存储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建新任务，初始状态pending，立即可认领
    async fn create(&self, new_task: &NewTask) -> OrchestratorResult<Task>;

    async fn get_by_id(&self, id: i64) -> OrchestratorResult<Option<Task>>;

    async fn list(&self, filter: &TaskFilter) -> OrchestratorResult<Vec<Task>>;

    /// 原子认领下一个可执行任务
    ///
    /// 在单条条件更新内完成：选出 scheduled_at 已到、类型匹配能力集、
    /// 按有效优先级降序（老化窗口防饿死）、创建时间升序的pending任务，
    /// 置为running并绑定Agent。并发的认领者之间靠行锁互斥，
    /// 同一任务绝不会被认领两次。
    async fn claim_next(
        &self,
        agent_id: &str,
        capabilities: &[Capability],
        aging_window_seconds: i64,
    ) -> OrchestratorResult<Option<Task>>;

    /// 成功完成，守卫 status='running'
    ///
    /// 已处于终态的任务返回false且不改动result与时间戳（幂等）。
    async fn complete(&self, id: i64, result: serde_json::Value) -> OrchestratorResult<bool>;

    /// 记录失败，守卫 status='running'
    ///
    /// 失败原因先落盘到result，之后才由失败管理器决定重试或死信。
    async fn mark_failed(&self, id: i64, failure: &TaskFailure) -> OrchestratorResult<bool>;

    /// 重试入队，守卫 status='failed' 且 retry_count < max_retries
    ///
    /// retry_count加一，清空assigned_agent_id与运行时间戳，
    /// scheduled_at推迟delay实现退避。
    async fn requeue(&self, id: i64, delay: Duration) -> OrchestratorResult<bool>;

    /// 转入死信终态，守卫 status='failed'
    async fn mark_dead_letter(&self, id: i64) -> OrchestratorResult<bool>;

    /// 取消任务，守卫 status='pending'；运行中任务不可抢占
    async fn cancel(&self, id: i64) -> OrchestratorResult<bool>;

    async fn get_by_agent_id(&self, agent_id: &str, limit: i64) -> OrchestratorResult<Vec<Task>>;

    async fn get_running(&self) -> OrchestratorResult<Vec<Task>>;

    /// 运行时长超过自身timeout_seconds的任务（看门狗扫描）
    async fn get_timeout_tasks(&self) -> OrchestratorResult<Vec<Task>>;

    /// 失败待裁决的任务（失败管理器崩溃后的恢复扫描）
    async fn get_failed(&self) -> OrchestratorResult<Vec<Task>>;

    /// 死信队列查询，供运维检视与手工重投
    async fn list_dead_letter(&self, limit: i64) -> OrchestratorResult<Vec<Task>>;

    /// 统计没有任何给定能力可匹配的pending任务数（仅用于指标）
    async fn count_unmatched_pending(
        &self,
        capabilities: &[Capability],
    ) -> OrchestratorResult<i64>;

    async fn queue_stats(&self) -> OrchestratorResult<QueueStats>;
}

/// Agent注册表抽象
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// 注册Agent，按 name + agent_type 幂等
    ///
    /// 已存在时更新能力集与metadata并回到stopped状态，保留原id。
    async fn register(&self, registration: &AgentRegistration) -> OrchestratorResult<AgentInfo>;

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<AgentInfo>>;

    async fn list(&self) -> OrchestratorResult<Vec<AgentInfo>>;

    /// 状态变更，非法的生命周期转换返回InvalidTransition
    async fn update_status(&self, id: &str, status: AgentStatus) -> OrchestratorResult<()>;

    /// 心跳上报：刷新last_heartbeat并携带metadata
    ///
    /// starting与degraded状态在此恢复为running。
    /// last_heartbeat只有这条路径会写。
    async fn heartbeat(
        &self,
        id: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<AgentInfo>;

    /// 具备指定能力且状态为running的Agent
    async fn find_eligible(&self, capability: &Capability) -> OrchestratorResult<Vec<AgentInfo>>;

    /// 所有状态为running的Agent
    async fn list_eligible(&self) -> OrchestratorResult<Vec<AgentInfo>>;

    /// 心跳间隔超过阈值秒数的Agent（健康扫描）
    async fn get_stale(&self, threshold_seconds: i64) -> OrchestratorResult<Vec<AgentInfo>>;
}
