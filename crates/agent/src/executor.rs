use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{Capability, Task};

/// 任务执行器
///
/// 业务逻辑的注入点。执行器声明自己能处理的能力标签，
/// 运行时按任务的task_type路由。返回的JSON会原样写入任务result。
///
/// 失败分类：返回的错误经过 `is_retryable()` 判定，
/// 不可重试的错误作为永久失败上报，直接进死信。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行器名称，用于日志
    fn name(&self) -> &str;

    /// 该执行器能处理的能力标签
    fn capabilities(&self) -> Vec<Capability>;

    async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value>;
}

/// 执行器注册表，按能力标签路由
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<Capability, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// 注册执行器，后注册的覆盖同能力的先注册者
    pub fn register(&mut self, executor: Arc<dyn TaskExecutor>) {
        for capability in executor.capabilities() {
            self.executors.insert(capability, executor.clone());
        }
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        let capability = Capability::new(task_type).ok()?;
        self.executors.get(&capability).cloned()
    }

    /// 注册表覆盖的全部能力，作为Agent的注册能力集
    pub fn capabilities(&self) -> Vec<Capability> {
        self.executors.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_testing_utils::TaskBuilder;

    struct EchoExecutor;

    #[async_trait]
    impl TaskExecutor for EchoExecutor {
        fn name(&self) -> &str {
            "echo"
        }

        fn capabilities(&self) -> Vec<Capability> {
            vec![
                Capability::new("echo").unwrap(),
                Capability::new("noop").unwrap(),
            ]
        }

        async fn execute(&self, task: &Task) -> OrchestratorResult<serde_json::Value> {
            Ok(task.payload.clone())
        }
    }

    #[test]
    fn test_registry_routes_by_capability() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor));

        assert!(registry.get("echo").is_some());
        assert!(registry.get("noop").is_some());
        assert!(registry.get("scrape").is_none());
        assert_eq!(registry.capabilities().len(), 2);
    }

    #[tokio::test]
    async fn test_executor_echoes_payload() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor));

        let task = TaskBuilder::new()
            .with_task_type("echo")
            .with_payload(serde_json::json!({"hello": "world"}))
            .build();
        let executor = registry.get("echo").unwrap();
        let result = executor.execute(&task).await.unwrap();
        assert_eq!(result["hello"], "world");
    }
}
