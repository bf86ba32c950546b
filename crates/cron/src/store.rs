//! Persistence for job parameters.

use std::sync::Arc;

use {async_trait::async_trait, parley_store::KvStore, tracing::warn};

use crate::{Result, types::CronParams};

const KEY_PREFIX: &str = "cron:job:";

/// Storage for job parameters keyed by job name.
#[async_trait]
pub trait CronJobStore: Send + Sync {
    async fn save(&self, name: &str, params: &CronParams) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn load(&self, name: &str) -> Result<Option<CronParams>>;
    /// Every persisted job whose name starts with `prefix`, sorted by name.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, CronParams)>>;
}

/// Jobs stored as JSON maps under `cron:job:<name>`.
pub struct KvCronStore {
    kv: Arc<dyn KvStore>,
}

impl KvCronStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(name: &str) -> String {
        format!("{KEY_PREFIX}{name}")
    }
}

#[async_trait]
impl CronJobStore for KvCronStore {
    async fn save(&self, name: &str, params: &CronParams) -> Result<()> {
        Ok(self.kv.set_map(&Self::key(name), params).await?)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.kv.del(&Self::key(name)).await?;
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<CronParams>> {
        Ok(self.kv.get_map(&Self::key(name)).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, CronParams)>> {
        let mut jobs = Vec::new();
        for key in self.kv.keys(&Self::key(prefix)).await? {
            let Some(name) = key.strip_prefix(KEY_PREFIX) else {
                continue;
            };
            match self.kv.get_map(&key).await {
                Ok(Some(params)) => jobs.push((name.to_string(), params)),
                Ok(None) => {},
                Err(e) => warn!(key, error = %e, "skipping unreadable cron job"),
            }
        }
        Ok(jobs)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parley_store::MemoryKvStore};

    fn params(spec: &str, target: &str) -> CronParams {
        CronParams::from([
            ("spec".to_string(), spec.to_string()),
            ("target".to_string(), target.to_string()),
        ])
    }

    #[tokio::test]
    async fn lists_by_kind_prefix() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = KvCronStore::new(Arc::clone(&kv));
        store.save("jiadan:g1", &params("*/30 8-23 * * *", "g1")).await.unwrap();
        store.save("jiadan:g2", &params("0 9 * * *", "g2")).await.unwrap();
        store.save("other:x", &params("0 9 * * *", "x")).await.unwrap();
        kv.set("cron:job:jiadan:bad", "not json", None).await.unwrap();

        let jobs = store.list("jiadan:").await.unwrap();
        let names: Vec<_> = jobs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["jiadan:g1", "jiadan:g2"]);
        assert_eq!(jobs[0].1["target"], "g1");

        store.delete("jiadan:g1").await.unwrap();
        assert!(store.load("jiadan:g1").await.unwrap().is_none());
        assert!(kv.exists("cron:job:other:x").await.unwrap());
    }
}
