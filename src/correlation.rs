// Per-request correlation store
// Carries the original scheme/host of a request to the rewrite of its response

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Key tying a proxied request to its response
pub type CorrelationKey = Uuid;

/// Client-facing origin of a request, used to rewrite upstream URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub original_scheme: String,
    pub original_host: String,
}

impl RequestContext {
    pub fn new(original_scheme: impl Into<String>, original_host: impl Into<String>) -> Self {
        Self {
            original_scheme: original_scheme.into(),
            original_host: original_host.into(),
        }
    }

    /// Base URL clients should see in rewritten bodies (`scheme://host/`)
    pub fn base_url(&self) -> String {
        format!("{}://{}/", self.original_scheme, self.original_host)
    }
}

struct PendingContext {
    context: RequestContext,
    created_at: Instant,
}

/// Sharded map of in-flight request contexts
///
/// Every entry is consumed at most once. Entries that are never consumed
/// are dropped by [`CorrelationStore::evict_expired`].
#[derive(Clone, Default)]
pub struct CorrelationStore {
    pending: Arc<DashMap<CorrelationKey, PendingContext>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `context` under a fresh key
    pub fn insert(&self, context: RequestContext) -> CorrelationKey {
        let key = Uuid::new_v4();
        self.pending.insert(
            key,
            PendingContext {
                context,
                created_at: Instant::now(),
            },
        );
        key
    }

    /// Remove and return the context stored under `key`
    pub fn take(&self, key: &CorrelationKey) -> Option<RequestContext> {
        self.pending.remove(key).map(|(_, pending)| pending.context)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop entries older than `ttl`, returning how many were removed
    pub fn evict_expired(&self, ttl: Duration) -> usize {
        let before = self.len();
        self.pending
            .retain(|_, pending| pending.created_at.elapsed() <= ttl);
        before.saturating_sub(self.len())
    }

    /// Periodically evict entries whose response never arrived
    pub fn spawn_sweeper(&self, ttl: Duration) -> JoinHandle<()> {
        let store = self.clone();
        let period = (ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = store.evict_expired(ttl);
                if evicted > 0 {
                    tracing::debug!(evicted, pending = store.len(), "Evicted unclaimed request contexts");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let ctx = RequestContext::new("https", "client.example.org");
        assert_eq!(ctx.base_url(), "https://client.example.org/");

        let ctx = RequestContext::new("http", "localhost:8080");
        assert_eq!(ctx.base_url(), "http://localhost:8080/");
    }

    #[test]
    fn test_take_is_single_use() {
        let store = CorrelationStore::new();
        let key = store.insert(RequestContext::new("https", "a.example.org"));

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.take(&key),
            Some(RequestContext::new("https", "a.example.org"))
        );
        assert_eq!(store.take(&key), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_keys_are_distinct_per_request() {
        let store = CorrelationStore::new();
        // Same client address, same host: still two independent entries
        let a = store.insert(RequestContext::new("http", "proxy.local"));
        let b = store.insert(RequestContext::new("https", "proxy.local"));

        assert_ne!(a, b);
        assert_eq!(store.take(&b).unwrap().original_scheme, "https");
        assert_eq!(store.take(&a).unwrap().original_scheme, "http");
    }

    #[test]
    fn test_evict_expired() {
        let store = CorrelationStore::new();
        store.insert(RequestContext::new("http", "a"));
        store.insert(RequestContext::new("http", "b"));

        assert_eq!(store.evict_expired(Duration::from_secs(60)), 0);
        assert_eq!(store.len(), 2);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.evict_expired(Duration::from_millis(5)), 2);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_and_take() {
        let store = CorrelationStore::new();

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let host = format!("host-{}", i);
                    let key = store.insert(RequestContext::new("http", host.clone()));
                    tokio::task::yield_now().await;
                    assert_eq!(store.take(&key).unwrap().original_host, host);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert!(store.is_empty());
    }
}
