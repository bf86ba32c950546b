//! In-memory key-value store for tests and ephemeral runs.

use std::{collections::HashMap, sync::Mutex, time::Duration};

use {async_trait::async_trait, tokio::time::Instant};

use crate::{Result, kv::KvStore};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// `HashMap`-backed store. Nothing survives the process.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry {
            value: value.to_string(),
            expires_at: expiry(ttl),
        });
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), Entry {
            value: value.to_string(),
            expires_at: expiry(ttl),
        });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            },
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        entries.retain(|_, e| e.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
impl MemoryKvStore {
    fn stored(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::collections::BTreeMap};

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_frees_the_key() {
        let store = MemoryKvStore::new();
        let ttl = Some(Duration::from_secs(300));
        assert!(store.set_nx("dedup:wechat:m1", "1", ttl).await.unwrap());
        assert!(!store.set_nx("dedup:wechat:m1", "1", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(store.exists("dedup:wechat:m1").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("dedup:wechat:m1").await.unwrap());
        assert!(store.set_nx("dedup:wechat:m1", "1", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_released() {
        let store = MemoryKvStore::new();
        let ttl = Some(Duration::from_secs(60));
        for i in 0..10 {
            store.set(&format!("dedup:wechat:m{i}"), "1", ttl).await.unwrap();
        }
        store.set("access:u1", "1", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.get("dedup:wechat:m0").await.unwrap(), None);
        assert_eq!(store.stored(), 10);
        assert_eq!(store.purge_expired().await.unwrap(), 9);
        assert_eq!(store.stored(), 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn keys_filters_by_prefix() {
        let store = MemoryKvStore::new();
        store.set("access:b", "1", None).await.unwrap();
        store.set("access:a", "1", None).await.unwrap();
        store.set("avatar:a", "x", None).await.unwrap();
        assert_eq!(store.keys("access:").await.unwrap(), vec![
            "access:a",
            "access:b"
        ]);
        assert!(store.del("access:a").await.unwrap());
        assert!(!store.del("access:a").await.unwrap());
    }

    #[tokio::test]
    async fn maps_round_trip_through_json() {
        let store = MemoryKvStore::new();
        let map = BTreeMap::from([
            ("spec".to_string(), "*/30 8-23 * * *".to_string()),
            ("target".to_string(), "g1".to_string()),
        ]);
        store.set_map("cron:job:jiadan:g1", &map).await.unwrap();
        assert_eq!(store.get_map("cron:job:jiadan:g1").await.unwrap(), Some(map));
        assert_eq!(store.get_map("cron:job:missing").await.unwrap(), None);
    }
}
