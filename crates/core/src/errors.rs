use thiserror::Error;

/// 编排系统错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("存储错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("Agent未找到: {id}")]
    AgentNotFound { id: String },

    #[error("无效的能力标签: {0}")]
    InvalidCapability(String),

    #[error("任务瞬时失败: {0}")]
    TransientTask(String),

    #[error("任务永久失败: {0}")]
    PermanentTask(String),

    #[error("没有可用的Agent: 能力 {capability}")]
    AgentUnavailable { capability: String },

    #[error("非法状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("任务执行超时")]
    ExecutionTimeout,

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }

    pub fn agent_not_found<S: Into<String>>(id: S) -> Self {
        Self::AgentNotFound { id: id.into() }
    }

    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }

    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 判断错误是否可重试
    ///
    /// 存储层故障与瞬时任务失败按策略重试；
    /// 永久失败、校验失败等直接失败关闭。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Database(_)
                | OrchestratorError::DatabaseOperation(_)
                | OrchestratorError::TransientTask(_)
                | OrchestratorError::ExecutionTimeout
        )
    }
}
