//! Per-conversation agent registry.
//!
//! Each conversation id gets its own long-lived agent so the transcript
//! carries over between turns. Entries are bounded two ways: idle entries
//! older than the TTL are dropped on access, and once `max_agents` is
//! reached the least recently used idle entry makes room for a new one.
//! An agent that is checked out is never evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stepwise_config::RegistryConfig;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

struct Entry<A> {
    agent: Arc<Mutex<A>>,
    last_used: Instant,
}

impl<A> Entry<A> {
    /// Someone outside the registry still holds the agent.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.agent) > 1
    }
}

pub struct AgentRegistry<A> {
    entries: RwLock<HashMap<String, Entry<A>>>,
    max_agents: usize,
    idle_ttl: Duration,
}

impl<A> AgentRegistry<A> {
    pub fn new(max_agents: usize, idle_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_agents: max_agents.max(1),
            idle_ttl,
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.max_agents, Duration::from_secs(config.idle_ttl_secs))
    }

    /// Look up the conversation's agent, creating it with `create` if absent.
    pub async fn get_or_create(&self, id: &str, create: impl FnOnce() -> A) -> Arc<Mutex<A>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        self.evict_expired(&mut entries, now);

        if let Some(entry) = entries.get_mut(id) {
            entry.last_used = now;
            return entry.agent.clone();
        }

        // Agents mid-run are never evicted; with none idle the registry
        // runs over capacity until one is released.
        while entries.len() >= self.max_agents {
            let oldest_idle = entries
                .iter()
                .filter(|(_, e)| !e.in_use())
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            let Some(key) = oldest_idle else {
                warn!(
                    agents = entries.len(),
                    max_agents = self.max_agents,
                    "Agent registry over capacity, every agent is in use"
                );
                break;
            };
            debug!(conversation_id = %key, "Evicting least recently used agent");
            entries.remove(&key);
        }

        debug!(conversation_id = %id, "Creating agent");
        let agent = Arc::new(Mutex::new(create()));
        entries.insert(
            id.to_string(),
            Entry {
                agent: agent.clone(),
                last_used: now,
            },
        );
        agent
    }

    /// Look up an existing agent, counting the lookup as a use.
    pub async fn touch(&self, id: &str) -> Option<Arc<Mutex<A>>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        self.evict_expired(&mut entries, now);
        let entry = entries.get_mut(id)?;
        entry.last_used = now;
        Some(entry.agent.clone())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Mutex<A>>> {
        self.entries.read().await.get(id).map(|e| e.agent.clone())
    }

    /// Forget a conversation's agent. A run already in progress keeps its handle.
    pub async fn remove(&self, id: &str) -> bool {
        self.entries.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every idle entry past its TTL. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        let mut entries = self.entries.write().await;
        self.evict_expired(&mut entries, Instant::now())
    }

    fn evict_expired(&self, entries: &mut HashMap<String, Entry<A>>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|id, e| {
            let keep = e.in_use() || now.duration_since(e.last_used) < self.idle_ttl;
            if !keep {
                debug!(conversation_id = %id, "Evicting idle agent");
            }
            keep
        });
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_returns_same_agent() {
        let registry = AgentRegistry::new(10, Duration::from_secs(60));
        let a = registry.get_or_create("c1", || 1u32).await;
        let b = registry.get_or_create("c1", || 2u32).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(*b.lock().await, 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_least_recently_used_when_full() {
        let registry = AgentRegistry::new(2, Duration::from_secs(3600));
        drop(registry.get_or_create("a", || 'a').await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("b", || 'b').await);
        tokio::time::advance(Duration::from_secs(1)).await;
        // touch "a" so "b" becomes the oldest
        drop(registry.get_or_create("a", || 'x').await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("c", || 'c').await);

        assert_eq!(registry.len().await, 2);
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn prefers_evicting_idle_agents_over_busy_ones() {
        let registry = AgentRegistry::new(2, Duration::from_secs(3600));
        let busy = registry.get_or_create("busy", || 0).await;
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("idle", || 1).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("new", || 2).await);

        assert!(registry.get("busy").await.is_some());
        assert!(registry.get("idle").await.is_none());
        drop(busy);
    }

    #[tokio::test(start_paused = true)]
    async fn full_registry_never_evicts_agents_in_use() {
        let registry = AgentRegistry::new(1, Duration::from_secs(3600));
        let a = registry.get_or_create("a", || 'a').await;
        let run_on_a = a.clone().try_lock_owned().unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("b", || 'b').await);
        assert_eq!(registry.len().await, 2);

        let again = registry.get_or_create("a", || 'x').await;
        assert!(Arc::ptr_eq(&a, &again));
        assert!(again.clone().try_lock_owned().is_err());
        drop(run_on_a);

        // once released, "a" is the eviction candidate again
        drop(a);
        drop(again);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("b", || 'y').await);
        drop(registry.get_or_create("c", || 'c').await);
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("c").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_ttl_expires_entries() {
        let registry = AgentRegistry::new(10, Duration::from_secs(60));
        drop(registry.get_or_create("old", || 0).await);
        let held = registry.get_or_create("held", || 1).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.evict_idle().await, 1);
        assert!(registry.get("old").await.is_none());
        assert!(registry.get("held").await.is_some());
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_refreshes_without_creating() {
        let registry = AgentRegistry::new(2, Duration::from_secs(60));
        assert!(registry.touch("a").await.is_none());
        assert!(registry.is_empty().await);

        drop(registry.get_or_create("a", || 0).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        drop(registry.get_or_create("b", || 1).await);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(registry.touch("a").await.is_some());

        // "b" is now the least recently used
        drop(registry.get_or_create("c", || 2).await);
        assert!(registry.get("a").await.is_some());
        assert!(registry.get("b").await.is_none());
    }

    #[tokio::test]
    async fn remove_forgets_agent() {
        let registry = AgentRegistry::new(10, Duration::from_secs(60));
        drop(registry.get_or_create("c1", || 0).await);
        assert!(registry.remove("c1").await);
        assert!(!registry.remove("c1").await);
        assert!(registry.is_empty().await);
    }
}
