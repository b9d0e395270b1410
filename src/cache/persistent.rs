//! Persistent tier: a networked or on-disk key-value store behind a wrapper
//! that never lets a store failure reach the caller.

use crate::metrics::METRICS;
use crate::{Result, ScentKitError};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const HEALTH_KEY: &str = "health::store";

/// Size and entry count of a backend, where it can report them.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StoreStats {
    pub entry_count: usize,
    pub total_size_bytes: u64,
}

/// Raw byte-oriented key-value backend.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    fn stats(&self) -> Option<StoreStats> {
        None
    }
}

/// Process-local backend. Stands in for the persistent tier when blobs need
/// somewhere to live and nothing durable is configured.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl KvStore for MemoryKv {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn stats(&self) -> Option<StoreStats> {
        Some(StoreStats {
            entry_count: self.entries.len(),
            total_size_bytes: self.entries.iter().map(|e| e.value().len() as u64).sum(),
        })
    }
}

/// Non-fatal wrapper around a [`KvStore`].
///
/// Every call is time-bounded. Errors, timeouts and undecodable payloads are
/// logged, counted, and reported as "not found" / "not stored".
#[derive(Clone)]
pub struct GuardedStore {
    inner: Arc<dyn KvStore>,
    timeout: Duration,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn KvStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    pub fn stats(&self) -> Option<StoreStats> {
        self.inner.stats()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.guard("get", key, self.inner.get(key)).await??;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("[cache] {} returned undecodable value for {}: {}", self.backend(), key, e);
                METRICS.store_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Returns whether the value was stored.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("[cache] failed to encode value for {}: {}", key, e);
                return false;
            }
        };
        self.guard("set", key, self.inner.set(key, &bytes)).await.is_some()
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.guard("delete", key, self.inner.delete(key)).await.is_some()
    }

    /// Round-trips a marker through the store.
    pub async fn probe(&self) -> bool {
        #[derive(Serialize, Deserialize)]
        struct Marker {
            ts: i64,
        }

        let marker = Marker { ts: crate::cache::now_millis() };
        if !self.set_json(HEALTH_KEY, &marker).await {
            return false;
        }
        let ok = self
            .get_json::<Marker>(HEALTH_KEY)
            .await
            .is_some_and(|read| read.ts == marker.ts);
        self.delete(HEALTH_KEY).await;
        ok
    }

    async fn guard<T, F>(&self, op: &str, key: &str, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let failure = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => ScentKitError::CacheUnavailable(format!("{op} timed out after {:?}", self.timeout)),
        };
        tracing::warn!("[cache] {} {} failed for {}: {}", self.backend(), op, key, failure);
        METRICS.store_errors.fetch_add(1, Ordering::Relaxed);
        None
    }
}
