use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{
    AgentInfo, AgentRegistration, AgentRepository, AgentStatus, Capability,
};

const AGENT_COLUMNS: &str =
    "id, name, agent_type, capabilities, status, last_heartbeat, registered_at, metadata";

/// PostgreSQL Agent注册表实现
pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 将数据库行转换为AgentInfo模型
    fn row_to_agent_info(row: &sqlx::postgres::PgRow) -> OrchestratorResult<AgentInfo> {
        let capabilities: Vec<String> = row.try_get("capabilities")?;
        Ok(AgentInfo {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            agent_type: row.try_get("agent_type")?,
            capabilities: Capability::parse_all(&capabilities)?,
            status: row.try_get("status")?,
            last_heartbeat: row.try_get("last_heartbeat")?,
            registered_at: row.try_get("registered_at")?,
            metadata: row.try_get("metadata")?,
        })
    }

    fn rows_to_agents(rows: &[sqlx::postgres::PgRow]) -> OrchestratorResult<Vec<AgentInfo>> {
        rows.iter().map(Self::row_to_agent_info).collect()
    }
}

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    /// 注册Agent，按 name + agent_type 幂等
    ///
    /// 冲突时更新能力集与metadata并回到stopped，id保持不变，
    /// 崩溃重连的Agent因此拿回原有身份。
    #[instrument(skip(self, registration), fields(
        agent_name = %registration.name,
        agent_type = %registration.agent_type,
    ))]
    async fn register(&self, registration: &AgentRegistration) -> OrchestratorResult<AgentInfo> {
        let capability_names: Vec<String> = registration
            .capabilities
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();
        let id = Uuid::new_v4().to_string();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO agent_registry (id, name, agent_type, capabilities, status, metadata)
            VALUES ($1, $2, $3, $4, 'stopped', $5)
            ON CONFLICT (name, agent_type) DO UPDATE SET
                capabilities = EXCLUDED.capabilities,
                status = 'stopped',
                metadata = EXCLUDED.metadata
            RETURNING {AGENT_COLUMNS}
            "#,
        ))
        .bind(&id)
        .bind(&registration.name)
        .bind(&registration.agent_type)
        .bind(&capability_names)
        .bind(&registration.metadata)
        .fetch_one(&self.pool)
        .await?;

        let agent = Self::row_to_agent_info(&row)?;
        debug!("注册Agent成功: id={} name={}", agent.id, agent.name);
        Ok(agent)
    }

    async fn get_by_id(&self, id: &str) -> OrchestratorResult<Option<AgentInfo>> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent_registry WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_agent_info).transpose()
    }

    async fn list(&self) -> OrchestratorResult<Vec<AgentInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent_registry ORDER BY registered_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_agents(&rows)
    }

    /// 状态变更，先校验生命周期再做CAS更新
    ///
    /// 并发写入导致当前状态已变时返回存储操作错误，由调用方重读重试。
    #[instrument(skip(self), fields(agent_id = %id, target = %status.as_str()))]
    async fn update_status(&self, id: &str, status: AgentStatus) -> OrchestratorResult<()> {
        let current = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| OrchestratorError::agent_not_found(id))?;

        if !current.status.can_transition_to(status) {
            return Err(OrchestratorError::InvalidTransition {
                from: current.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let updated = sqlx::query("UPDATE agent_registry SET status = $2 WHERE id = $1 AND status = $3")
            .bind(id)
            .bind(status)
            .bind(current.status)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            warn!("Agent状态并发变更冲突: id={}", id);
            return Err(OrchestratorError::database_error(format!(
                "Agent {id} 状态并发变更冲突"
            )));
        }
        Ok(())
    }

    /// 心跳上报：单条更新内刷新last_heartbeat并恢复降级状态
    #[instrument(skip(self, metadata), fields(agent_id = %id))]
    async fn heartbeat(
        &self,
        id: &str,
        metadata: serde_json::Value,
    ) -> OrchestratorResult<AgentInfo> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE agent_registry
            SET last_heartbeat = NOW(),
                metadata = $2,
                status = CASE
                    WHEN status IN ('starting', 'degraded') THEN 'running'
                    ELSE status
                END
            WHERE id = $1
            RETURNING {AGENT_COLUMNS}
            "#,
        ))
        .bind(id)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| OrchestratorError::agent_not_found(id))?;

        Self::row_to_agent_info(&row)
    }

    async fn find_eligible(&self, capability: &Capability) -> OrchestratorResult<Vec<AgentInfo>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {AGENT_COLUMNS} FROM agent_registry
            WHERE status = 'running' AND $1 = ANY(capabilities)
            "#,
        ))
        .bind(capability.as_str())
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_agents(&rows)
    }

    async fn list_eligible(&self) -> OrchestratorResult<Vec<AgentInfo>> {
        let rows = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agent_registry WHERE status = 'running'"
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_agents(&rows)
    }

    /// 心跳超过阈值的存活Agent，供健康扫描降级
    async fn get_stale(&self, threshold_seconds: i64) -> OrchestratorResult<Vec<AgentInfo>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {AGENT_COLUMNS} FROM agent_registry
            WHERE status IN ('starting', 'running', 'degraded')
              AND last_heartbeat < NOW() - make_interval(secs => $1)
            "#,
        ))
        .bind(threshold_seconds as f64)
        .fetch_all(&self.pool)
        .await?;

        Self::rows_to_agents(&rows)
    }
}
