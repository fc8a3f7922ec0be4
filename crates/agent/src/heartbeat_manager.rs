use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use orchestrator_client::AgentClient;

/// 心跳循环
///
/// 周期性上报last_heartbeat与负载metadata。心跳是Agent健康的
/// 唯一凭据：只有这条路径会刷新注册表里的last_heartbeat，
/// 也是degraded状态恢复running的路径。
pub struct HeartbeatManager {
    client: Arc<AgentClient>,
    agent_id: String,
    interval_seconds: u64,
    max_concurrent_tasks: usize,
    current_tasks: Arc<AtomicUsize>,
    hostname: String,
}

impl HeartbeatManager {
    pub fn new(
        client: Arc<AgentClient>,
        agent_id: String,
        interval_seconds: u64,
        max_concurrent_tasks: usize,
        current_tasks: Arc<AtomicUsize>,
    ) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            client,
            agent_id,
            interval_seconds,
            max_concurrent_tasks,
            current_tasks,
            hostname,
        }
    }

    /// 心跳metadata：当前负载、容量上限、主机名
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "current_task_count": self.current_tasks.load(Ordering::SeqCst),
            "max_concurrent_tasks": self.max_concurrent_tasks,
            "hostname": self.hostname,
        })
    }

    /// 上报一次心跳
    pub async fn beat(&self) {
        if let Err(e) = self
            .client
            .report_heartbeat(&self.agent_id, self.metadata())
            .await
        {
            error!("Agent {} 心跳上报失败: {}", self.agent_id, e);
        }
    }

    /// 启动心跳后台任务
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(self.interval_seconds));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.beat().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Agent {} 心跳循环退出", self.agent_id);
                        break;
                    }
                }
            }
        })
    }
}
