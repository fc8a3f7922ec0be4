//! Metrics collection for the orchestration core
//!
//! Counters and gauges are registered up front via the metrics crate so the
//! Prometheus exporter exposes them with zero values before the first event.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_domain::QueueStats;

/// Metrics collector for the task orchestration core
pub struct MetricsCollector {
    // Task lifecycle metrics
    tasks_submitted_total: Counter,
    tasks_claimed_total: Counter,
    tasks_completed_total: Counter,
    tasks_failed_total: Counter,
    tasks_retried_total: Counter,
    tasks_dead_letter_total: Counter,
    tasks_cancelled_total: Counter,
    task_execution_duration: Histogram,

    // Queue depth gauges, one per status
    queue_pending: Gauge,
    queue_running: Gauge,
    queue_failed: Gauge,
    queue_dead_letter: Gauge,

    // Dispatcher metrics
    dispatch_cycle_duration: Histogram,
    unmatched_pending_tasks: Gauge,
    store_retries_total: Counter,

    // Agent metrics
    eligible_agents: Gauge,
    agents_degraded_total: Counter,
    agents_unhealthy_total: Counter,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let tasks_submitted_total = counter!("orchestrator_tasks_submitted_total");
        let tasks_claimed_total = counter!("orchestrator_tasks_claimed_total");
        let tasks_completed_total = counter!("orchestrator_tasks_completed_total");
        let tasks_failed_total = counter!("orchestrator_tasks_failed_total");
        let tasks_retried_total = counter!("orchestrator_tasks_retried_total");
        let tasks_dead_letter_total = counter!("orchestrator_tasks_dead_letter_total");
        let tasks_cancelled_total = counter!("orchestrator_tasks_cancelled_total");
        let task_execution_duration = histogram!("orchestrator_task_execution_duration_seconds");

        let queue_pending = gauge!("orchestrator_queue_pending");
        let queue_running = gauge!("orchestrator_queue_running");
        let queue_failed = gauge!("orchestrator_queue_failed");
        let queue_dead_letter = gauge!("orchestrator_queue_dead_letter");

        let dispatch_cycle_duration = histogram!("orchestrator_dispatch_cycle_duration_seconds");
        let unmatched_pending_tasks = gauge!("orchestrator_unmatched_pending_tasks");
        let store_retries_total = counter!("orchestrator_store_retries_total");

        let eligible_agents = gauge!("orchestrator_eligible_agents");
        let agents_degraded_total = counter!("orchestrator_agents_degraded_total");
        let agents_unhealthy_total = counter!("orchestrator_agents_unhealthy_total");

        Self {
            tasks_submitted_total,
            tasks_claimed_total,
            tasks_completed_total,
            tasks_failed_total,
            tasks_retried_total,
            tasks_dead_letter_total,
            tasks_cancelled_total,
            task_execution_duration,
            queue_pending,
            queue_running,
            queue_failed,
            queue_dead_letter,
            dispatch_cycle_duration,
            unmatched_pending_tasks,
            store_retries_total,
            eligible_agents,
            agents_degraded_total,
            agents_unhealthy_total,
        }
    }

    /// 安装Prometheus导出器，进程内只能调用一次
    pub fn install_exporter() -> OrchestratorResult<()> {
        PrometheusBuilder::new()
            .install()
            .map_err(|e| OrchestratorError::config_error(format!("指标导出器安装失败: {e}")))?;
        info!("Prometheus指标导出器已安装");
        Ok(())
    }

    pub fn record_task_submitted(&self, task_type: &str) {
        self.tasks_submitted_total.increment(1);
        info!(task_type = task_type, "任务已提交");
    }

    pub fn record_task_claimed(&self, task_type: &str, agent_id: &str) {
        self.tasks_claimed_total.increment(1);
        info!(task_type = task_type, agent_id = agent_id, "任务已认领");
    }

    pub fn record_task_completed(&self, task_type: &str, duration_seconds: f64) {
        self.tasks_completed_total.increment(1);
        self.task_execution_duration.record(duration_seconds);
        info!(
            task_type = task_type,
            duration_seconds = duration_seconds,
            "任务执行完成"
        );
    }

    pub fn record_task_failed(&self, task_type: &str, failure_kind: &str) {
        self.tasks_failed_total.increment(1);
        warn!(
            task_type = task_type,
            failure_kind = failure_kind,
            "任务执行失败"
        );
    }

    pub fn record_task_retried(&self, task_type: &str, retry_count: i32) {
        self.tasks_retried_total.increment(1);
        info!(
            task_type = task_type,
            retry_count = retry_count,
            "任务重试入队"
        );
    }

    pub fn record_task_dead_letter(&self, task_type: &str) {
        self.tasks_dead_letter_total.increment(1);
        warn!(task_type = task_type, "任务转入死信");
    }

    pub fn record_task_cancelled(&self, task_type: &str) {
        self.tasks_cancelled_total.increment(1);
        info!(task_type = task_type, "任务已取消");
    }

    /// 队列深度快照，派发循环每轮上报
    pub fn record_queue_stats(&self, stats: &QueueStats) {
        self.queue_pending.set(stats.pending as f64);
        self.queue_running.set(stats.running as f64);
        self.queue_failed.set(stats.failed as f64);
        self.queue_dead_letter.set(stats.dead_letter as f64);
    }

    pub fn record_dispatch_cycle(&self, duration_seconds: f64) {
        self.dispatch_cycle_duration.record(duration_seconds);
    }

    /// 当前没有任何可匹配Agent能认领的pending任务数
    pub fn record_unmatched_pending(&self, count: i64) {
        self.unmatched_pending_tasks.set(count as f64);
    }

    /// 存储层故障后的退避重试
    pub fn record_store_retry(&self) {
        self.store_retries_total.increment(1);
    }

    pub fn record_eligible_agents(&self, count: usize) {
        self.eligible_agents.set(count as f64);
    }

    pub fn record_agent_degraded(&self, agent_id: &str) {
        self.agents_degraded_total.increment(1);
        warn!(agent_id = agent_id, "Agent心跳超时，已降级");
    }

    pub fn record_agent_unhealthy(&self, agent_id: &str) {
        self.agents_unhealthy_total.increment(1);
        warn!(agent_id = agent_id, "Agent持续失联，已标记为不健康");
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
