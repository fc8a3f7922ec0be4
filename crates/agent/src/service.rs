use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use orchestrator_client::AgentClient;
use orchestrator_core::config::AgentRuntimeConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::{AgentRegistration, AgentStatus, Capability, Task};

use crate::executor::ExecutorRegistry;
use crate::heartbeat_manager::HeartbeatManager;

/// Agent运行时
///
/// 生命周期：注册（幂等拿回身份）-> starting -> 首次心跳转running
/// -> 拉取认领循环 -> 收到关闭信号后 stopping -> 排空在途任务 ->
/// stopped。并发执行数由 `max_concurrent_tasks` 封顶，
/// 当前负载随心跳上报。
pub struct AgentService {
    client: Arc<AgentClient>,
    registry: Arc<ExecutorRegistry>,
    config: AgentRuntimeConfig,
    current_tasks: Arc<AtomicUsize>,
}

impl AgentService {
    pub fn new(
        client: Arc<AgentClient>,
        registry: Arc<ExecutorRegistry>,
        config: AgentRuntimeConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            current_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// 注册并确认能力集合法
    ///
    /// 配置声明的能力必须都有执行器覆盖，否则拒绝启动。
    async fn register(&self) -> OrchestratorResult<String> {
        let capabilities = Capability::parse_all(&self.config.capabilities)?;
        for capability in &capabilities {
            if self.registry.get(capability.as_str()).is_none() {
                return Err(OrchestratorError::validation_error(format!(
                    "能力 {capability} 没有对应的执行器"
                )));
            }
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let registration =
            AgentRegistration::new(&self.config.name, &self.config.agent_type, capabilities)
                .with_metadata(serde_json::json!({"hostname": hostname}));

        let agent = self.client.register(registration).await?;
        Ok(agent.id)
    }

    /// 运行Agent直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> OrchestratorResult<()> {
        let agent_id = self.register().await?;
        info!("Agent {} ({}) 已注册", self.config.name, agent_id);

        self.client
            .update_status(&agent_id, AgentStatus::Starting)
            .await?;

        // 首次心跳把starting推进到running
        let heartbeat = Arc::new(HeartbeatManager::new(
            self.client.clone(),
            agent_id.clone(),
            self.config.heartbeat_interval_seconds,
            self.config.max_concurrent_tasks,
            self.current_tasks.clone(),
        ));
        heartbeat.beat().await;
        let heartbeat_handle = heartbeat.clone().spawn(shutdown_rx.resubscribe());

        self.poll_loop(&agent_id, shutdown_rx).await;

        // 优雅停机：停止认领，排空在途任务
        if let Err(e) = self
            .client
            .update_status(&agent_id, AgentStatus::Stopping)
            .await
        {
            warn!("Agent {} 进入stopping失败: {}", agent_id, e);
        }
        self.drain().await;
        heartbeat_handle.abort();
        if let Err(e) = self
            .client
            .update_status(&agent_id, AgentStatus::Stopped)
            .await
        {
            warn!("Agent {} 进入stopped失败: {}", agent_id, e);
        }
        info!("Agent {} 已停止", agent_id);
        Ok(())
    }

    async fn poll_loop(&self, agent_id: &str, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_seconds));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // 容量占满时暂停认领
                    if self.current_tasks.load(Ordering::SeqCst) >= self.config.max_concurrent_tasks {
                        continue;
                    }
                    match self.client.claim_task(agent_id).await {
                        Ok(Some(task)) => {
                            debug!("Agent {} 认领任务 {}", agent_id, task.id);
                            self.current_tasks.fetch_add(1, Ordering::SeqCst);
                            let client = self.client.clone();
                            let registry = self.registry.clone();
                            let counter = self.current_tasks.clone();
                            tokio::spawn(async move {
                                Self::execute_task(client, registry, task).await;
                                counter.fetch_sub(1, Ordering::SeqCst);
                            });
                        }
                        Ok(None) => {}
                        Err(e) => error!("Agent {} 认领任务失败: {}", agent_id, e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Agent {} 收到关闭信号，停止认领", agent_id);
                    break;
                }
            }
        }
    }

    /// 执行单个任务并上报结果
    ///
    /// 执行受任务自身timeout_seconds约束；Agent侧超时按瞬时失败
    /// 上报，与看门狗的回收通过mark_failed的守卫互斥。
    async fn execute_task(client: Arc<AgentClient>, registry: Arc<ExecutorRegistry>, task: Task) {
        let Some(executor) = registry.get(&task.task_type) else {
            // 能力集与执行器失配属于部署错误，不值得重试
            let message = format!("没有能处理 {} 的执行器", task.task_type);
            error!("任务 {} 执行失败: {}", task.id, message);
            if let Err(e) = client.fail_task(task.id, &message, true).await {
                error!("任务 {} 失败上报出错: {}", task.id, e);
            }
            return;
        };

        let timeout = Duration::from_secs(task.timeout_seconds.max(1) as u64);
        let outcome = tokio::time::timeout(timeout, executor.execute(&task)).await;

        let report = match outcome {
            Ok(Ok(result)) => client.complete_task(task.id, result).await.map(|done| {
                if done {
                    info!("任务 {} 执行完成", task.id);
                } else {
                    debug!("任务 {} 已被回收，完成上报被忽略", task.id);
                }
            }),
            Ok(Err(e)) => {
                warn!("任务 {} 执行失败: {}", task.id, e);
                client
                    .fail_task(task.id, &e.to_string(), !e.is_retryable())
                    .await
                    .map(|_| ())
            }
            Err(_) => {
                warn!(
                    "任务 {} 执行超过 {} 秒，按超时上报",
                    task.id, task.timeout_seconds
                );
                client
                    .fail_task(
                        task.id,
                        &format!("执行超过 {} 秒未完成", task.timeout_seconds),
                        false,
                    )
                    .await
                    .map(|_| ())
            }
        };
        if let Err(e) = report {
            error!("任务 {} 结果上报出错: {}", task.id, e);
        }
    }

    /// 等待在途任务执行完毕，最多等30秒
    async fn drain(&self) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while self.current_tasks.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "停机排空超时，仍有 {} 个在途任务，交由看门狗回收",
                    self.current_tasks.load(Ordering::SeqCst)
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
