use crate::cache::persistent::{KvStore, StoreStats};
use crate::{Result, ScentKitError};
use sled::Db;
use std::path::Path;

/// Sled-backed persistent tier
///
/// This store provides:
/// - Durable storage across restarts on a single host
/// - Atomic single-key writes
/// - Pure Rust (no C++ compilation needed)
///
/// Unlike the memory tier it never evicts: entries stay until an operator
/// removes them.
pub struct SledStore {
    db: Db,
}

impl SledStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ScentKitError::Configuration(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self { db })
    }

    /// Throwaway database, removed on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| ScentKitError::Configuration(format!("Failed to open Sled database: {}", e)))?;
        Ok(Self { db })
    }
}

#[async_trait::async_trait]
impl KvStore for SledStore {
    fn backend(&self) -> &'static str {
        "sled"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.db
            .get(key.as_bytes())
            .map(|v| v.map(|ivec| ivec.to_vec()))
            .map_err(|e| ScentKitError::CacheUnavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.db
            .insert(key.as_bytes(), value)
            .map_err(|e| ScentKitError::CacheUnavailable(format!("Failed to write entry: {}", e)))?;

        // Flush to disk
        self.db
            .flush_async()
            .await
            .map_err(|e| ScentKitError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db
            .remove(key.as_bytes())
            .map_err(|e| ScentKitError::CacheUnavailable(e.to_string()))?;
        Ok(())
    }

    fn stats(&self) -> Option<StoreStats> {
        Some(StoreStats {
            entry_count: self.db.len(),
            total_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }
}
