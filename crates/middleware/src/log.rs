use std::sync::Arc;

use {async_trait::async_trait, parley_channels::NormalizedMessage, tracing::debug};

use crate::{Middleware, MiddlewareContext, Result};

/// Logs every inbound message. Never consumes.
pub struct LogMiddleware;

pub fn factory(_ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    Some(Box::new(LogMiddleware))
}

#[async_trait]
impl Middleware for LogMiddleware {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        debug!(
            id = %msg.id,
            user = %msg.user_id,
            group = msg.group_id.as_deref().unwrap_or(""),
            kind = ?msg.kind,
            mentioned = msg.is_mentioned,
            content = %msg.content,
            "inbound message"
        );
        Ok(false)
    }
}
