use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::info;

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{Capability, Task};

use crate::executor::TaskExecutor;

/// Shell任务参数，从任务payload解析
#[derive(Debug, Deserialize)]
struct ShellTaskParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    env_vars: HashMap<String, String>,
}

const OUTPUT_LIMIT: usize = 8192;

fn truncate_output(raw: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(raw).into_owned();
    if text.len() > OUTPUT_LIMIT {
        let mut cut = OUTPUT_LIMIT;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("…(截断)");
    }
    text
}

/// 内置Shell执行器
///
/// 把任务payload当作命令描述执行，stdout/stderr截断后写入结果。
/// 参数解析失败按永久失败上报，非零退出码按瞬时失败上报。
/// 部署方通常会注册自己的业务执行器替换它。
pub struct ShellExecutor {
    capabilities: Vec<Capability>,
}

impl ShellExecutor {
    /// 创建覆盖给定能力集的Shell执行器
    pub fn for_capabilities(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }

    async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value> {
        let params: ShellTaskParams =
            serde_json::from_value(task.payload.clone()).map_err(|e| {
                OrchestratorError::InvalidTaskParams(format!("解析Shell任务参数失败: {e}"))
            })?;

        info!(
            task_id = task.id,
            command = %params.command,
            "执行Shell任务"
        );

        let mut cmd = Command::new(&params.command);
        cmd.args(&params.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = params.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &params.env_vars {
            cmd.env(key, value);
        }

        let output = cmd.output().await.map_err(|e| {
            // 命令不存在或无法启动属于部署问题，重试也不会好
            OrchestratorError::PermanentTask(format!("启动命令 {} 失败: {e}", params.command))
        })?;

        let stdout = truncate_output(&output.stdout);
        let stderr = truncate_output(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);

        if !output.status.success() {
            return Err(OrchestratorError::TransientTask(format!(
                "命令退出码 {exit_code}: {stderr}"
            )));
        }

        Ok(serde_json::json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::TaskBuilder;

    fn executor() -> ShellExecutor {
        ShellExecutor::for_capabilities(vec![Capability::new("execute").unwrap()])
    }

    #[tokio::test]
    async fn test_shell_executor_captures_stdout() {
        let task = TaskBuilder::new()
            .with_task_type("execute")
            .with_payload(serde_json::json!({"command": "echo", "args": ["hello"]}))
            .build();

        let result = executor().execute(&task).await.unwrap();
        assert_eq!(result["exit_code"], 0);
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn test_shell_executor_rejects_bad_payload() {
        let task = TaskBuilder::new()
            .with_task_type("execute")
            .with_payload(serde_json::json!({"not_a_command": true}))
            .build();

        let err = executor().execute(&task).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_shell_executor_nonzero_exit_is_transient() {
        let task = TaskBuilder::new()
            .with_task_type("execute")
            .with_payload(serde_json::json!({"command": "false"}))
            .build();

        let err = executor().execute(&task).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_shell_executor_missing_command_is_permanent() {
        let task = TaskBuilder::new()
            .with_task_type("execute")
            .with_payload(serde_json::json!({"command": "/nonexistent/command-xyz"}))
            .build();

        let err = executor().execute(&task).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_truncate_output_respects_char_boundary() {
        let long = "好".repeat(OUTPUT_LIMIT);
        let truncated = truncate_output(long.as_bytes());
        assert!(truncated.len() <= OUTPUT_LIMIT + "…(截断)".len());
        assert!(truncated.ends_with("…(截断)"));
    }
}
