use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use orchestrator_core::{OrchestratorError, OrchestratorResult};

/// 能力标签
///
/// 任务与Agent之间的匹配凭据。注册时校验，派发时只做等值比较，
/// 避免在派发路径上对自由文本做模式匹配。
///
/// 合法格式：小写字母、数字、`-`、`_`，长度1-64。
///
/// # 使用示例
///
/// ```rust
/// use orchestrator_domain::Capability;
///
/// let cap: Capability = "scrape".parse().unwrap();
/// assert_eq!(cap.as_str(), "scrape");
/// assert!("Scrape Pages!".parse::<Capability>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability(String);

impl Capability {
    pub const MAX_LEN: usize = 64;

    pub fn new<S: Into<String>>(value: S) -> OrchestratorResult<Self> {
        let value = value.into();
        if value.is_empty() || value.len() > Self::MAX_LEN {
            return Err(OrchestratorError::InvalidCapability(value));
        }
        let valid = value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(OrchestratorError::InvalidCapability(value));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 批量解析能力标签，任一非法即整体失败
    pub fn parse_all(values: &[String]) -> OrchestratorResult<Vec<Capability>> {
        values.iter().map(|v| Capability::new(v.clone())).collect()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Capability {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::new(s)
    }
}

impl TryFrom<String> for Capability {
    type Error = OrchestratorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Capability::new(value)
    }
}

impl From<Capability> for String {
    fn from(value: Capability) -> Self {
        value.0
    }
}

/// 失败类别
///
/// Permanent直接进入死信；其余按重试策略处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 瞬时失败（网络、超限等），按策略重试
    Transient,
    /// 永久失败（校验、业务规则），不重试
    Permanent,
    /// 看门狗超时，按瞬时失败处理
    Timeout,
    /// Agent失联后的任务回收，按瞬时失败处理
    AgentUnavailable,
}

impl FailureKind {
    pub fn is_permanent(&self) -> bool {
        matches!(self, FailureKind::Permanent)
    }
}

/// 任务失败记录
///
/// 在任何状态转换之前先落盘到任务的result字段，保证失败原因不丢失。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
    pub agent_id: Option<String>,
}

impl TaskFailure {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            agent_id: None,
        }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
            agent_id: None,
        }
    }

    pub fn timeout(timeout_seconds: i32) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!("任务执行超过 {timeout_seconds} 秒未完成，被看门狗回收"),
            agent_id: None,
        }
    }

    pub fn agent_unavailable(agent_id: &str) -> Self {
        Self {
            kind: FailureKind::AgentUnavailable,
            message: format!("Agent {agent_id} 失联，任务被重新入队"),
            agent_id: Some(agent_id.to_string()),
        }
    }

    pub fn with_agent(mut self, agent_id: &str) -> Self {
        self.agent_id = Some(agent_id.to_string());
        self
    }

    /// 序列化为写入任务result字段的JSON
    pub fn to_result_value(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.message,
            "kind": self.kind,
            "agent_id": self.agent_id,
        })
    }
}
