//! In-process caching for dispatch-path lookups
//!
//! The dispatcher re-reads the eligible agent set every cycle; a short TTL
//! cache keeps that read off the database without letting staleness exceed
//! one heartbeat interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use orchestrator_core::OrchestratorResult;
use orchestrator_domain::{AgentInfo, AgentRepository};

struct CacheEntry {
    agents: Vec<AgentInfo>,
    fetched_at: Instant,
}

/// 可匹配Agent集合的TTL读穿缓存
///
/// 单实例内共享，所有调度路径查询都经过这里，
/// 过期后由下一个读取者回源刷新。
pub struct EligibleAgentCache {
    repository: Arc<dyn AgentRepository>,
    ttl: Duration,
    entry: RwLock<Option<CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EligibleAgentCache {
    pub fn new(repository: Arc<dyn AgentRepository>, ttl: Duration) -> Self {
        Self {
            repository,
            ttl,
            entry: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 获取当前可匹配的Agent集合，过期时回源刷新
    pub async fn get(&self) -> OrchestratorResult<Vec<AgentInfo>> {
        {
            let guard = self.entry.read().await;
            if let Some(entry) = guard.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.agents.clone());
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.entry.write().await;
        // 竞争写锁期间可能已有别人刷新过
        if let Some(entry) = guard.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.agents.clone());
            }
        }

        let agents = self.repository.list_eligible().await?;
        debug!("刷新Agent缓存: {} 个可匹配Agent", agents.len());
        *guard = Some(CacheEntry {
            agents: agents.clone(),
            fetched_at: Instant::now(),
        });
        Ok(agents)
    }

    /// 使缓存立即失效，注册与状态变更路径调用
    pub async fn invalidate(&self) {
        let mut guard = self.entry.write().await;
        *guard = None;
    }

    /// 命中与未命中计数
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use orchestrator_domain::{
        AgentRegistration, AgentStatus, Capability,
    };

    struct CountingAgentRepository {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AgentRepository for CountingAgentRepository {
        async fn register(
            &self,
            _registration: &AgentRegistration,
        ) -> OrchestratorResult<AgentInfo> {
            unimplemented!()
        }

        async fn get_by_id(&self, _id: &str) -> OrchestratorResult<Option<AgentInfo>> {
            Ok(None)
        }

        async fn list(&self) -> OrchestratorResult<Vec<AgentInfo>> {
            Ok(vec![])
        }

        async fn update_status(
            &self,
            _id: &str,
            _status: AgentStatus,
        ) -> OrchestratorResult<()> {
            Ok(())
        }

        async fn heartbeat(
            &self,
            _id: &str,
            _metadata: serde_json::Value,
        ) -> OrchestratorResult<AgentInfo> {
            unimplemented!()
        }

        async fn find_eligible(
            &self,
            _capability: &Capability,
        ) -> OrchestratorResult<Vec<AgentInfo>> {
            Ok(vec![])
        }

        async fn list_eligible(&self) -> OrchestratorResult<Vec<AgentInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![AgentInfo {
                id: "agent-1".to_string(),
                name: "scraper-01".to_string(),
                agent_type: "scraper".to_string(),
                capabilities: vec![Capability::new("scrape").unwrap()],
                status: AgentStatus::Running,
                last_heartbeat: Utc::now(),
                registered_at: Utc::now(),
                metadata: serde_json::Value::Null,
            }])
        }

        async fn get_stale(&self, _threshold_seconds: i64) -> OrchestratorResult<Vec<AgentInfo>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_cache_hits_within_ttl() {
        let repo = Arc::new(CountingAgentRepository {
            calls: AtomicUsize::new(0),
        });
        let cache = EligibleAgentCache::new(repo.clone(), Duration::from_secs(60));

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        // 只回源一次
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);

        let (hits, misses) = cache.stats();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let repo = Arc::new(CountingAgentRepository {
            calls: AtomicUsize::new(0),
        });
        let cache = EligibleAgentCache::new(repo.clone(), Duration::from_secs(60));

        cache.get().await.unwrap();
        cache.invalidate().await;
        cache.get().await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refreshes() {
        let repo = Arc::new(CountingAgentRepository {
            calls: AtomicUsize::new(0),
        });
        let cache = EligibleAgentCache::new(repo.clone(), Duration::from_secs(0));

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }
}
