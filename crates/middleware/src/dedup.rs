use std::sync::Arc;

use {async_trait::async_trait, parley_channels::NormalizedMessage, parley_store::IdempotencyStore};

use crate::{Middleware, MiddlewareContext, Result};

/// Drops redeliveries of a message id seen within the dedup window.
///
/// Placed early in the chain so nothing after it runs twice for the same
/// upstream event. Store failures also drop the message.
pub struct DedupMiddleware {
    seen: IdempotencyStore,
}

impl DedupMiddleware {
    pub fn new(ctx: &MiddlewareContext) -> Self {
        Self {
            seen: IdempotencyStore::new(
                Arc::clone(&ctx.kv),
                ctx.identity.platform.clone(),
                IdempotencyStore::DEFAULT_TTL,
            ),
        }
    }
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    Some(Box::new(DedupMiddleware::new(ctx)))
}

#[async_trait]
impl Middleware for DedupMiddleware {
    fn name(&self) -> &'static str {
        "dedup"
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        Ok(!self.seen.try_seen(&msg.id).await)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            Pipeline,
            log::LogMiddleware,
            testing::{RecordingClient, test_context},
        },
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    /// Counts messages that get past dedup and answers each one.
    struct Echo {
        ctx: Arc<MiddlewareContext>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Middleware for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.ctx.reply(msg, "pong");
            Ok(true)
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_triggers_no_sends() {
        let client = RecordingClient::new();
        let ctx = test_context(client.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(Arc::clone(&ctx));
        pipeline.push(Box::new(LogMiddleware));
        pipeline.push(Box::new(DedupMiddleware::new(&ctx)));
        pipeline.push(Box::new(Echo {
            ctx: Arc::clone(&ctx),
            calls: Arc::clone(&calls),
        }));

        let msg = NormalizedMessage::text("m1", "u1", "ping");
        assert!(pipeline.dispatch(&msg).await);
        assert_eq!(client.wait_for_texts("u1", 1).await, vec!["pong"]);

        // Consumed by dedup; the echo never runs.
        assert!(pipeline.dispatch(&msg).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tokio::task::yield_now().await;
        assert_eq!(client.texts_to("u1").len(), 1);

        assert!(pipeline.dispatch(&NormalizedMessage::text("m2", "u1", "ping")).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn namespace_follows_platform() {
        let ctx = test_context(RecordingClient::new());
        let dedup = DedupMiddleware::new(&ctx);
        assert!(!dedup.on_message(&NormalizedMessage::text("m9", "u1", "x")).await.unwrap());
        assert!(ctx.kv.exists("dedup:wechat:m9").await.unwrap());
    }
}
