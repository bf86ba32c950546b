use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::kv::KvStore;

/// Time-windowed "seen" set for one source namespace.
///
/// Collapses redeliveries of the same upstream event into a single
/// processing. Entries only leave through TTL expiry.
pub struct IdempotencyStore {
    kv: Arc<dyn KvStore>,
    namespace: String,
    ttl: Duration,
}

impl IdempotencyStore {
    /// Window for live chat messages.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new(kv: Arc<dyn KvStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, id: &str) -> String {
        format!("dedup:{}:{id}", self.namespace)
    }

    /// Record `id` and return `true` if this is its first sighting in the window.
    ///
    /// Store failures count as duplicates: the event is skipped rather than
    /// risking a second side effect.
    pub async fn try_seen(&self, id: &str) -> bool {
        match self.kv.set_nx(&self.key(id), "1", Some(self.ttl)).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(namespace = %self.namespace, id, "duplicate delivery dropped");
                false
            },
            Err(e) => {
                warn!(namespace = %self.namespace, id, error = %e, "dedup store failed, skipping message");
                false
            },
        }
    }
}
