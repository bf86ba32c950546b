use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;

use crate::{Result, error::Context as _};

/// String key-value store with optional per-key expiry.
///
/// Expired keys are invisible to every read. All methods are safe to call
/// concurrently; `set_nx` is atomic.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Store `value` only if `key` is absent or expired. Returns whether it was stored.
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    /// Store `value`, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove `key`. Returns whether a live key was removed.
    async fn del(&self, key: &str) -> Result<bool>;

    /// Live keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove expired keys from storage. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Store a flat string map as one value.
    async fn set_map(&self, key: &str, map: &BTreeMap<String, String>) -> Result<()> {
        let encoded = serde_json::to_string(map)?;
        self.set(key, &encoded, None).await
    }

    async fn get_map(&self, key: &str) -> Result<Option<BTreeMap<String, String>>> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .with_context(|| format!("decode map at {key}")),
            None => Ok(None),
        }
    }
}
