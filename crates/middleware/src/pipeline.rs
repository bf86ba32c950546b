//! Ordered, short-circuiting dispatch over the registered middlewares.

use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_channels::NormalizedMessage,
    tracing::{debug, info, warn},
};

use crate::{Error, Result, context::MiddlewareContext};

/// One link in the chain.
///
/// `on_message` returns `true` when the message is consumed, which stops
/// dispatch for that message. Handlers must stay short: slow work is
/// spawned and answered later.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once, in registration order, before any message arrives.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once, in reverse registration order, during shutdown.
    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool>;
}

/// Builds a middleware against the shared context. `None` leaves it out,
/// e.g. when its configuration is absent.
pub type MiddlewareFactory = fn(&Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>>;

pub struct Pipeline {
    ctx: Arc<MiddlewareContext>,
    middlewares: Vec<Box<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(ctx: Arc<MiddlewareContext>) -> Self {
        Self {
            ctx,
            middlewares: Vec::new(),
        }
    }

    /// Instantiate `factories` in order.
    #[must_use]
    pub fn with_factories(mut self, factories: &[MiddlewareFactory]) -> Self {
        for factory in factories {
            if let Some(middleware) = factory(&self.ctx) {
                self.push(middleware);
            }
        }
        self
    }

    pub fn push(&mut self, middleware: Box<dyn Middleware>) {
        debug!(middleware = middleware.name(), "middleware registered");
        self.middlewares.push(middleware);
    }

    pub fn context(&self) -> &Arc<MiddlewareContext> {
        &self.ctx
    }

    /// Registered names in dispatch order.
    pub fn names(&self) -> Vec<&'static str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    /// Start every middleware in order. The first failure aborts; those
    /// already started are left running for [`Pipeline::stop`].
    pub async fn start(&self) -> Result<()> {
        for middleware in &self.middlewares {
            middleware.start().await.map_err(|e| Error::Start {
                name: middleware.name(),
                source: Box::new(e),
            })?;
            info!(middleware = middleware.name(), "middleware started");
        }
        Ok(())
    }

    /// Stop every middleware in reverse order. Failures are logged.
    pub async fn stop(&self) {
        for middleware in self.middlewares.iter().rev() {
            match middleware.stop().await {
                Ok(()) => debug!(middleware = middleware.name(), "middleware stopped"),
                Err(e) => warn!(middleware = middleware.name(), error = %e, "middleware stop failed"),
            }
        }
    }

    /// Offer `msg` to each middleware until one consumes it.
    ///
    /// A handler error is logged and treated as "not consumed", so the rest
    /// of the chain still sees the message.
    pub async fn dispatch(&self, msg: &NormalizedMessage) -> bool {
        for middleware in &self.middlewares {
            match middleware.on_message(msg).await {
                Ok(true) => {
                    debug!(middleware = middleware.name(), id = %msg.id, "message consumed");
                    return true;
                },
                Ok(false) => {},
                Err(e) => {
                    warn!(middleware = middleware.name(), id = %msg.id, error = %e, "middleware failed");
                },
            }
        }
        false
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{RecordingClient, test_context},
        std::sync::Mutex,
    };

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Stage {
        name: &'static str,
        consume: bool,
        fail_start: bool,
        fail_message: bool,
        journal: Journal,
    }

    impl Stage {
        fn new(name: &'static str, consume: bool, journal: &Journal) -> Box<Self> {
            Box::new(Self {
                name,
                consume,
                fail_start: false,
                fail_message: false,
                journal: Arc::clone(journal),
            })
        }

        fn log(&self, event: &str) {
            self.journal
                .lock()
                .unwrap()
                .push(format!("{}:{event}", self.name));
        }
    }

    #[async_trait]
    impl Middleware for Stage {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> Result<()> {
            self.log("start");
            if self.fail_start {
                return Err(Error::message("boom"));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.log("stop");
            Ok(())
        }

        async fn on_message(&self, _msg: &NormalizedMessage) -> Result<bool> {
            self.log("message");
            if self.fail_message {
                return Err(Error::message("handler broke"));
            }
            Ok(self.consume)
        }
    }

    fn pipeline() -> (Pipeline, Journal) {
        let ctx = test_context(RecordingClient::new());
        (Pipeline::new(ctx), Journal::default())
    }

    fn events(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn first_consumer_short_circuits() {
        let (mut p, journal) = pipeline();
        p.push(Stage::new("a", false, &journal));
        p.push(Stage::new("b", true, &journal));
        p.push(Stage::new("c", false, &journal));

        let consumed = p.dispatch(&NormalizedMessage::text("m1", "u1", "hi")).await;
        assert!(consumed);
        assert_eq!(events(&journal), vec!["a:message", "b:message"]);
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_the_chain() {
        let (mut p, journal) = pipeline();
        let mut broken = Stage::new("a", true, &journal);
        broken.fail_message = true;
        p.push(broken);
        p.push(Stage::new("b", false, &journal));

        assert!(!p.dispatch(&NormalizedMessage::text("m1", "u1", "hi")).await);
        assert_eq!(events(&journal), vec!["a:message", "b:message"]);
    }

    #[tokio::test]
    async fn start_in_order_and_stop_in_reverse() {
        let (mut p, journal) = pipeline();
        p.push(Stage::new("a", false, &journal));
        p.push(Stage::new("b", false, &journal));
        assert_eq!(p.names(), vec!["a", "b"]);

        p.start().await.unwrap();
        p.stop().await;
        assert_eq!(events(&journal), vec![
            "a:start", "b:start", "b:stop", "a:stop"
        ]);
    }

    #[tokio::test]
    async fn failed_start_aborts_without_rollback() {
        let (mut p, journal) = pipeline();
        p.push(Stage::new("a", false, &journal));
        let mut bad = Stage::new("b", false, &journal);
        bad.fail_start = true;
        p.push(bad);
        p.push(Stage::new("c", false, &journal));

        let err = p.start().await.unwrap_err();
        assert!(matches!(err, Error::Start { name: "b", .. }));
        assert_eq!(events(&journal), vec!["a:start", "b:start"]);
    }

    #[tokio::test]
    async fn factories_returning_none_are_skipped() {
        fn keep(_: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
            let stage: Box<dyn Middleware> = Stage::new("kept", false, &Journal::default());
            Some(stage)
        }
        fn skip(_: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
            None
        }

        let (p, _) = pipeline();
        let p = p.with_factories(&[skip, keep, skip]);
        assert_eq!(p.names(), vec!["kept"]);
    }
}
