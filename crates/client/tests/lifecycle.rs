//! 任务生命周期端到端场景测试
//!
//! 用内存mock仓储串起生产者契约、Agent契约与失败管理器，
//! mock与PostgreSQL实现执行同样的条件更新守卫。

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;

use orchestrator_client::{AgentClient, ProducerClient};
use orchestrator_core::config::RetryPolicyConfig;
use orchestrator_dispatcher::{FailureHandler, TaskFailureHandler};
use orchestrator_domain::{
    AgentRegistration, AgentStatus, Capability, NewTask, TaskStatus,
};
use orchestrator_infrastructure::MetricsCollector;
use orchestrator_testing_utils::{AgentBuilder, MockAgentRepository, MockTaskRepository};

const AGING_WINDOW: i64 = 60;

fn clients() -> (
    Arc<MockTaskRepository>,
    Arc<MockAgentRepository>,
    ProducerClient,
    AgentClient,
) {
    let task_repo = Arc::new(MockTaskRepository::new());
    let agent_repo = Arc::new(MockAgentRepository::new());
    let producer = ProducerClient::new(task_repo.clone());
    let agent = AgentClient::new(task_repo.clone(), agent_repo.clone(), AGING_WINDOW);
    (task_repo, agent_repo, producer, agent)
}

fn running_agent(agent_repo: &MockAgentRepository, id: &str, capability: &str) {
    agent_repo.insert(
        AgentBuilder::new()
            .with_id(id)
            .with_capabilities(&[capability])
            .with_status(AgentStatus::Running)
            .build(),
    );
}

fn scrape_task() -> NewTask {
    NewTask::new(
        Capability::new("scrape").unwrap(),
        json!({"url": "https://example.com"}),
        "producer-1",
    )
}

#[tokio::test]
async fn test_submit_claim_complete_happy_path() {
    let (_task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "scrape");

    let id = producer.create_task(scrape_task()).await.unwrap();
    let claimed = agent.claim_task("agent-1").await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.assigned_agent_id.as_deref(), Some("agent-1"));

    let completed = agent
        .complete_task(id, json!({"pages": 3}))
        .await
        .unwrap();
    assert!(completed);

    let view = producer.get_task_status(id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.result.unwrap()["pages"], 3);
}

#[tokio::test]
async fn test_cancel_pending_succeeds_cancel_running_refused() {
    let (_task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "scrape");

    let pending = producer.create_task(scrape_task()).await.unwrap();
    let running = producer.create_task(scrape_task()).await.unwrap();

    // 认领走掉其中一个，另一个留在pending
    let claimed = agent.claim_task("agent-1").await.unwrap().unwrap();
    let claimed_id = claimed.id;
    let still_pending = if claimed_id == pending { running } else { pending };

    assert!(producer.cancel_task(still_pending).await.unwrap());
    assert_eq!(
        producer.get_task_status(still_pending).await.unwrap().status,
        TaskStatus::Cancelled
    );

    // 运行中任务不可抢占取消
    assert!(!producer.cancel_task(claimed_id).await.unwrap());
    assert_eq!(
        producer.get_task_status(claimed_id).await.unwrap().status,
        TaskStatus::Running
    );
}

#[tokio::test]
async fn test_complete_is_idempotent_and_never_overwrites() {
    let (_task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "scrape");

    let id = producer.create_task(scrape_task()).await.unwrap();
    agent.claim_task("agent-1").await.unwrap().unwrap();

    assert!(agent.complete_task(id, json!({"attempt": 1})).await.unwrap());
    // 第二次完成上报是无副作用的no-op
    assert!(!agent.complete_task(id, json!({"attempt": 2})).await.unwrap());

    let view = producer.get_task_status(id).await.unwrap();
    assert_eq!(view.result.unwrap()["attempt"], 1);

    // 迟到的失败上报同样被守卫拒绝
    assert!(!agent.fail_task(id, "迟到的失败", false).await.unwrap());
    assert_eq!(
        producer.get_task_status(id).await.unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn test_retries_exhaust_into_dead_letter() {
    let (task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "scrape");

    let handler = TaskFailureHandler::new(
        task_repo.clone(),
        RetryPolicyConfig {
            base_delay_seconds: 0,
            max_delay_seconds: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        },
        Arc::new(MetricsCollector::new()),
    );

    let id = producer.create_task(scrape_task()).await.unwrap();

    // max_retries=3：首次执行加3次重试，第4次失败进死信
    let mut attempts = 0;
    loop {
        let Some(task) = agent.claim_task("agent-1").await.unwrap() else {
            break;
        };
        attempts += 1;
        agent.fail_task(task.id, "上游接口超时", false).await.unwrap();
        handler.recover_lingering_failures().await.unwrap();
    }

    assert_eq!(attempts, 4);
    let view = producer.get_task_status(id).await.unwrap();
    assert_eq!(view.status, TaskStatus::DeadLetter);
    assert_eq!(view.retry_count, 3);
    assert_eq!(view.result.unwrap()["error"], "上游接口超时");

    // 死信可检视、可重投为全新任务
    let dead = producer.list_dead_letter(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    let new_id = producer.resubmit(id).await.unwrap();
    assert_ne!(new_id, id);
    let view = producer.get_task_status(new_id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Pending);
    assert_eq!(view.retry_count, 0);
}

#[tokio::test]
async fn test_permanent_failure_skips_retry_budget() {
    let (task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "scrape");

    let handler = TaskFailureHandler::new(
        task_repo.clone(),
        RetryPolicyConfig::default(),
        Arc::new(MetricsCollector::new()),
    );

    let id = producer.create_task(scrape_task()).await.unwrap();
    agent.claim_task("agent-1").await.unwrap().unwrap();
    agent.fail_task(id, "payload缺少url字段", true).await.unwrap();
    handler.recover_lingering_failures().await.unwrap();

    let view = producer.get_task_status(id).await.unwrap();
    assert_eq!(view.status, TaskStatus::DeadLetter);
    assert_eq!(view.retry_count, 0);
}

#[tokio::test]
async fn test_task_waits_until_matching_agent_appears() {
    let (_task_repo, _agent_repo, producer, agent) = clients();

    let id = producer.create_task(scrape_task()).await.unwrap();

    // 没有任何Agent时任务留在pending
    let registered = agent
        .register(AgentRegistration::new(
            "scraper-01",
            "scraper",
            vec![Capability::new("scrape").unwrap()],
        ))
        .await
        .unwrap();
    assert_eq!(registered.status, AgentStatus::Stopped);

    // 注册后还没走到running，仍然不参与认领
    assert!(agent.claim_task(&registered.id).await.unwrap().is_none());
    assert_eq!(
        producer.get_task_status(id).await.unwrap().status,
        TaskStatus::Pending
    );

    // starting + 首次心跳 -> running，任务立刻可认领
    agent
        .update_status(&registered.id, AgentStatus::Starting)
        .await
        .unwrap();
    agent
        .report_heartbeat(&registered.id, json!({"current_task_count": 0}))
        .await
        .unwrap();
    let claimed = agent.claim_task(&registered.id).await.unwrap().unwrap();
    assert_eq!(claimed.id, id);
}

#[tokio::test]
async fn test_capability_mismatch_never_claims() {
    let (_task_repo, agent_repo, producer, agent) = clients();
    running_agent(&agent_repo, "agent-1", "send-email");

    producer.create_task(scrape_task()).await.unwrap();
    assert!(agent.claim_task("agent-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_claims_never_double_assign() {
    let (task_repo, agent_repo, producer, _agent) = clients();

    const TASKS: usize = 20;
    const AGENTS: usize = 8;

    for _ in 0..TASKS {
        producer.create_task(scrape_task()).await.unwrap();
    }
    for i in 0..AGENTS {
        running_agent(&agent_repo, &format!("agent-{i}"), "scrape");
    }

    let mut handles = Vec::new();
    for i in 0..AGENTS {
        let client = AgentClient::new(task_repo.clone(), agent_repo.clone(), AGING_WINDOW);
        let agent_id = format!("agent-{i}");
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = client.claim_task(&agent_id).await.unwrap() {
                claimed.push(task.id);
            }
            claimed
        }));
    }

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.unwrap());
    }

    // 每个任务恰好被认领一次
    assert_eq!(all_claimed.len(), TASKS);
    let distinct: HashSet<i64> = all_claimed.iter().copied().collect();
    assert_eq!(distinct.len(), TASKS);

    let stats = producer.queue_stats().await.unwrap();
    assert_eq!(stats.running, TASKS as i64);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_resubmit_rejects_non_dead_letter() {
    let (_task_repo, _agent_repo, producer, _agent) = clients();
    let id = producer.create_task(scrape_task()).await.unwrap();
    assert!(producer.resubmit(id).await.is_err());
}
