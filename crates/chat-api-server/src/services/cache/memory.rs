use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheBackend, CacheError};

#[derive(Clone)]
struct CacheEntry {
    value: String,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    // >= so a zero TTL is expired on the very next read.
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= self.ttl
    }
}

/// Process-local cache. Expiry is lazy: entries die when read after their
/// TTL, or when [`InProcessBackend::cleanup_expired`] sweeps them.
pub struct InProcessBackend {
    entries: DashMap<String, CacheEntry>,
}

impl InProcessBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }
}

impl Default for InProcessBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for InProcessBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                created_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_retrieves_within_ttl() {
        let backend = InProcessBackend::new();
        backend
            .set("k", "v", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(backend.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_dropped_on_read() {
        let backend = InProcessBackend::new();
        backend.set("k", "v", Duration::ZERO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_entries() {
        let backend = InProcessBackend::new();
        backend.set("dead", "v", Duration::ZERO).await.unwrap();
        backend
            .set("alive", "v", Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let removed = backend.cleanup_expired();

        assert_eq!(removed, 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.get("alive").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn prefix_delete_spares_other_prefixes() {
        let backend = InProcessBackend::new();
        backend
            .set("models:a", "1", Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set("models:b", "2", Duration::from_secs(60))
            .await
            .unwrap();
        backend
            .set("users:a", "3", Duration::from_secs(60))
            .await
            .unwrap();

        backend.delete_prefix("models:").await.unwrap();

        assert_eq!(backend.get("models:a").await.unwrap(), None);
        assert_eq!(backend.get("models:b").await.unwrap(), None);
        assert_eq!(backend.get("users:a").await.unwrap(), Some("3".to_string()));
    }
}
