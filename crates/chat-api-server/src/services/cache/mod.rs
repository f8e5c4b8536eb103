//! Pluggable key/value cache with TTLs.
//!
//! Callers talk to [`CacheLayer`] only. The backend (redis or the in-process
//! map) is chosen once at startup; when the distributed backend misbehaves
//! the layer retries once, then serves the in-process fallback and logs the
//! degradation. A cache problem is never surfaced to a request.

pub mod memory;
pub mod redis;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::settings::CacheConfig;

pub use memory::InProcessBackend;
pub use redis::RedisBackend;

pub const NS_MODELS: &str = "models";
pub const NS_USER_PROFILE: &str = "user_profile";
pub const NS_CONVERSATIONS: &str = "conversations";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Storage-facing contract. Values are opaque strings; TTLs are absolute.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub backend: &'static str,
    pub reachable: bool,
}

pub struct CacheLayer {
    primary: Option<Box<dyn CacheBackend>>,
    fallback: InProcessBackend,
    config: CacheConfig,
    stats: CacheStats,
}

impl CacheLayer {
    /// Builds the layer the configuration asks for. An unparseable redis URL
    /// degrades to the in-process map right away instead of failing startup.
    pub fn from_config(config: &CacheConfig) -> Self {
        let primary: Option<Box<dyn CacheBackend>> = match config.backend.as_str() {
            "redis" => match RedisBackend::new(&config.redis_url) {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    warn!("redis cache unavailable, using in-process cache: {}", e);
                    None
                }
            },
            _ => None,
        };
        Self::with_primary(primary, config.clone())
    }

    pub fn with_primary(primary: Option<Box<dyn CacheBackend>>, config: CacheConfig) -> Self {
        Self {
            primary,
            fallback: InProcessBackend::new(),
            config,
            stats: CacheStats::default(),
        }
    }

    fn full_key(namespace: &str, key: &str) -> String {
        format!("{}:{}", namespace, key)
    }

    fn default_ttl(&self, namespace: &str) -> u64 {
        match namespace {
            NS_MODELS => self.config.ttl_models,
            NS_USER_PROFILE => self.config.ttl_user_profile,
            NS_CONVERSATIONS => self.config.ttl_conversations,
            _ => self.config.ttl_default,
        }
    }

    /// Looks a value up. Expired and missing entries are both a miss; a
    /// misbehaving primary is retried once and then bypassed.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let full_key = Self::full_key(namespace, key);

        let raw = match &self.primary {
            Some(primary) => match self.primary_get(primary.as_ref(), &full_key).await {
                Ok(value) => value,
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        backend = primary.name(),
                        key = %full_key,
                        "cache degraded, serving in-process fallback: {}",
                        e
                    );
                    self.fallback.get(&full_key).await.ok().flatten()
                }
            },
            None => self.fallback.get(&full_key).await.ok().flatten(),
        };

        let Some(raw) = raw else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %full_key, "cache hit");
                Some(value)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %full_key, "dropping undecodable cache entry: {}", e);
                let _ = self.fallback.delete(&full_key).await;
                None
            }
        }
    }

    async fn primary_get(
        &self,
        primary: &dyn CacheBackend,
        full_key: &str,
    ) -> Result<Option<String>, CacheError> {
        match primary.get(full_key).await {
            Ok(value) => Ok(value),
            // One transparent retry before falling back.
            Err(_) => primary.get(full_key).await,
        }
    }

    /// Stores a value. `ttl` seconds, defaulted per namespace; a zero TTL
    /// means the entry is expired on arrival, so any previous value is
    /// dropped and the next `get` misses.
    pub async fn set<T: Serialize>(&self, namespace: &str, key: &str, value: &T, ttl: Option<u64>) {
        let full_key = Self::full_key(namespace, key);
        let ttl = ttl.unwrap_or_else(|| self.default_ttl(namespace));
        self.stats.sets.fetch_add(1, Ordering::Relaxed);

        if ttl == 0 {
            self.delete_everywhere(&full_key).await;
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %full_key, "failed to encode cache value: {}", e);
                return;
            }
        };
        let ttl = Duration::from_secs(ttl);

        if let Some(primary) = &self.primary {
            if let Err(e) = primary.set(&full_key, &raw, ttl).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend = primary.name(),
                    key = %full_key,
                    "cache degraded, write kept in-process only: {}",
                    e
                );
            }
        }
        // Mirror every write so the fallback stays warm.
        if let Err(e) = self.fallback.set(&full_key, &raw, ttl).await {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %full_key, "in-process cache write failed: {}", e);
        }
    }

    pub async fn invalidate(&self, namespace: &str, key: &str) {
        let full_key = Self::full_key(namespace, key);
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);
        self.delete_everywhere(&full_key).await;
    }

    /// Drops every entry of a namespace, e.g. after a conversation write.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        let prefix = format!("{}:", namespace);
        self.stats.deletes.fetch_add(1, Ordering::Relaxed);

        if let Some(primary) = &self.primary {
            if let Err(e) = primary.delete_prefix(&prefix).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = primary.name(), %prefix, "cache degraded on invalidation: {}", e);
            }
        }
        let _ = self.fallback.delete_prefix(&prefix).await;
    }

    async fn delete_everywhere(&self, full_key: &str) {
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.delete(full_key).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(backend = primary.name(), key = %full_key, "cache degraded on delete: {}", e);
            }
        }
        let _ = self.fallback.delete(full_key).await;
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            sets: self.stats.sets.load(Ordering::Relaxed),
            deletes: self.stats.deletes.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn health(&self) -> CacheHealth {
        match &self.primary {
            Some(primary) => CacheHealth {
                backend: primary.name(),
                reachable: primary.ping().await.is_ok(),
            },
            None => CacheHealth {
                backend: self.fallback.name(),
                reachable: true,
            },
        }
    }

    /// Sweeps expired in-process entries; expiry is otherwise lazy.
    pub fn cleanup_expired(&self) -> usize {
        self.fallback.cleanup_expired()
    }
}
