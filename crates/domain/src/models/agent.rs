use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value_objects::Capability;

/// Agent节点信息
///
/// `last_heartbeat` 只由Agent自身的心跳调用刷新，
/// 健康监控和派发器都只读取它。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Agent状态
///
/// 生命周期：stopped -> starting -> running，
/// 心跳缺失降级 running -> degraded -> unhealthy，
/// 心跳恢复 degraded -> running，
/// 停机 -> stopping -> stopped。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AgentStatus {
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "degraded")]
    Degraded,
    #[serde(rename = "unhealthy")]
    Unhealthy,
    #[serde(rename = "stopping")]
    Stopping,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Stopped => "stopped",
            AgentStatus::Starting => "starting",
            AgentStatus::Running => "running",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Unhealthy => "unhealthy",
            AgentStatus::Stopping => "stopping",
        }
    }

    /// 只有running状态的Agent参与任务匹配
    pub fn is_eligible(&self) -> bool {
        matches!(self, AgentStatus::Running)
    }

    /// 状态机合法转换校验
    pub fn can_transition_to(&self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Degraded)
                | (Starting, Stopping)
                | (Running, Degraded)
                | (Running, Stopping)
                | (Degraded, Running)
                | (Degraded, Unhealthy)
                | (Degraded, Stopping)
                | (Unhealthy, Stopping)
                | (Unhealthy, Stopped)
                | (Stopping, Stopped)
        )
    }
}

impl sqlx::Type<sqlx::Postgres> for AgentStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for AgentStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "stopped" => Ok(AgentStatus::Stopped),
            "starting" => Ok(AgentStatus::Starting),
            "running" => Ok(AgentStatus::Running),
            "degraded" => Ok(AgentStatus::Degraded),
            "unhealthy" => Ok(AgentStatus::Unhealthy),
            "stopping" => Ok(AgentStatus::Stopping),
            _ => Err(format!("Invalid agent status: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for AgentStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// Agent注册请求
///
/// 注册按 name + agent_type 幂等：崩溃重连的Agent拿回原有身份，
/// 从stopped状态重新走生命周期。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<Capability>,
    pub metadata: serde_json::Value,
}

impl AgentRegistration {
    pub fn new(name: &str, agent_type: &str, capabilities: Vec<Capability>) -> Self {
        Self {
            name: name.to_string(),
            agent_type: agent_type.to_string(),
            capabilities,
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

impl AgentInfo {
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// 检查心跳是否超过给定阈值
    pub fn is_heartbeat_stale(&self, now: DateTime<Utc>, threshold_seconds: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > threshold_seconds
    }

    /// 从metadata读取当前任务数（心跳上报），缺省为0
    pub fn current_task_count(&self) -> i64 {
        self.metadata
            .get("current_task_count")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}
