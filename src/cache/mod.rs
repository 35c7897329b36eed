//! Caching layer for oracle and exchange lookups
//!
//! - `Cache`: object-safe async store over serialized values
//! - `CacheExt`: typed `get`/`set` helpers through serde_json
//! - `MemoryCache`: in-process store with per-entry expiry
//! - `RedisCache`: bb8-pooled Redis store that degrades to misses when Redis is down

pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "cache")]
pub mod redis_cache;

pub use error::{CacheError, CacheResult};
pub use memory::MemoryCache;
#[cfg(feature = "cache")]
pub use redis_cache::{init_cache_pool, CacheConfig, RedisCache, RedisPool};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_raw(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Reachability probe for health checks
    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Typed helpers over any `Cache`
#[async_trait]
pub trait CacheExt: Cache {
    async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw, ttl).await
    }

    /// Read-through lookup: cache errors count as misses and are logged
    async fn get_or_miss<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Best-effort write; failures are logged and swallowed
    async fn set_quietly<T: Serialize + Sync>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if let Err(e) = self.set(key, value, ttl).await {
            warn!(key, error = %e, "cache write failed");
        }
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
