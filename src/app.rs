use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use orchestrator_agent::{AgentService, ExecutorRegistry, ShellExecutor};
use orchestrator_client::AgentClient;
use orchestrator_core::AppConfig;
use orchestrator_dispatcher::{
    AgentFailureDetector, FailureHandler, TaskDispatcher, TaskFailureHandler, TimeoutWatchdog,
};
use orchestrator_domain::{AgentRepository, Capability, TaskRepository};
use orchestrator_infrastructure::{
    DatabaseManager, EligibleAgentCache, MetricsCollector, PostgresAgentRepository,
    PostgresTaskRepository,
};

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 仅运行调度侧（派发循环、看门狗、健康监控）
    Dispatcher,
    /// 仅运行Agent运行时
    Agent,
    /// 运行所有启用的组件
    All,
}

/// 主应用程序
///
/// 持有共享的仓储与指标收集器，按模式组装并运行各组件。
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    task_repo: Arc<dyn TaskRepository>,
    agent_repo: Arc<dyn AgentRepository>,
    metrics: Arc<MetricsCollector>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let database = DatabaseManager::new(&config.database)
            .await
            .context("连接数据库失败")?;
        database.migrate().await.context("执行数据库迁移失败")?;
        let pool = database.pool();

        let task_repo: Arc<dyn TaskRepository> =
            Arc::new(PostgresTaskRepository::new(pool.clone()));
        let agent_repo: Arc<dyn AgentRepository> = Arc::new(PostgresAgentRepository::new(pool));

        let metrics = Arc::new(MetricsCollector::new());
        if config.observability.metrics_enabled {
            MetricsCollector::install_exporter().context("安装指标导出器失败")?;
        }

        Ok(Self {
            config,
            mode,
            task_repo,
            agent_repo,
            metrics,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await?,
            AppMode::Agent => self.run_agent(shutdown_rx).await?,
            AppMode::All => self.run_all_components(shutdown_rx).await?,
        }

        Ok(())
    }

    /// 运行调度侧：派发循环、超时看门狗、Agent健康监控
    async fn run_dispatcher(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Dispatcher服务");

        // 合格Agent视图允许一个轮询周期的滞后
        let cache_ttl = Duration::from_secs(self.config.dispatcher.poll_interval_seconds.max(1));
        let agent_cache = Arc::new(EligibleAgentCache::new(self.agent_repo.clone(), cache_ttl));

        let failure_handler: Arc<dyn FailureHandler> = Arc::new(TaskFailureHandler::new(
            self.task_repo.clone(),
            self.config.retry.clone(),
            self.metrics.clone(),
        ));

        let dispatcher = Arc::new(TaskDispatcher::new(
            self.task_repo.clone(),
            agent_cache.clone(),
            failure_handler.clone(),
            self.config.dispatcher.clone(),
            self.metrics.clone(),
        ));

        let watchdog = Arc::new(TimeoutWatchdog::new(
            self.task_repo.clone(),
            failure_handler.clone(),
            Duration::from_secs(self.config.health.sweep_interval_seconds),
        ));

        let detector = Arc::new(AgentFailureDetector::new(
            self.agent_repo.clone(),
            self.task_repo.clone(),
            failure_handler,
            agent_cache,
            self.config.health.clone(),
            self.metrics.clone(),
        ));

        let dispatcher_handle = {
            let dispatcher = Arc::clone(&dispatcher);
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { dispatcher.run(rx).await })
        };
        let watchdog_handle = {
            let watchdog = Arc::clone(&watchdog);
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { watchdog.run(rx).await })
        };
        let detector_handle = {
            let detector = Arc::clone(&detector);
            let rx = shutdown_rx.resubscribe();
            tokio::spawn(async move { detector.run(rx).await })
        };

        let _ = shutdown_rx.recv().await;
        info!("Dispatcher收到关闭信号");

        let _ = tokio::join!(dispatcher_handle, watchdog_handle, detector_handle);
        info!("Dispatcher服务已停止");
        Ok(())
    }

    /// 运行Agent运行时
    async fn run_agent(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Agent服务: {}", self.config.agent.name);

        let client = Arc::new(AgentClient::new(
            self.task_repo.clone(),
            self.agent_repo.clone(),
            self.config.dispatcher.aging_window_seconds as i64,
        ));

        // 内置Shell执行器覆盖配置声明的全部能力，
        // 业务部署通过注册自己的执行器替换
        let capabilities = Capability::parse_all(&self.config.agent.capabilities)
            .context("解析Agent能力集失败")?;
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(ShellExecutor::for_capabilities(capabilities)));

        let service = AgentService::new(client, Arc::new(registry), self.config.agent.clone());
        service.run(shutdown_rx).await?;

        info!("Agent服务已停止");
        Ok(())
    }

    /// 运行所有启用的组件
    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动所有组件");

        let mut handles = Vec::new();

        if self.config.dispatcher.enabled {
            let app = self.clone_for_mode(AppMode::Dispatcher);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_dispatcher(rx).await {
                    error!("Dispatcher运行失败: {e}");
                }
            }));
        }

        if self.config.agent.enabled {
            let app = self.clone_for_mode(AppMode::Agent);
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = app.run_agent(rx).await {
                    error!("Agent运行失败: {e}");
                }
            }));
        }

        if handles.is_empty() {
            anyhow::bail!("没有启用任何组件，请检查配置中的enabled开关");
        }

        for handle in handles {
            let _ = handle.await;
        }

        info!("所有组件已停止");
        Ok(())
    }

    fn clone_for_mode(&self, mode: AppMode) -> Self {
        Self {
            config: self.config.clone(),
            mode,
            task_repo: self.task_repo.clone(),
            agent_repo: self.agent_repo.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
