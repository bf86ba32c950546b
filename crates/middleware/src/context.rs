//! Services shared by every middleware.

use std::{collections::HashMap, future::Future, sync::Arc};

use {
    parley_channels::{
        ChatClient, MessageId, NormalizedMessage, PendingReply, SendTarget, send_image, send_text,
    },
    parley_common::BotIdentity,
    parley_config::ParleyConfig,
    parley_cron::CronScheduler,
    parley_store::{AccessService, AvatarStore, KvStore},
    tokio_util::sync::CancellationToken,
    tracing::warn,
};

/// Everything a middleware factory can draw on.
///
/// Built once at startup and shared behind an `Arc`; no middleware owns any
/// of these services.
pub struct MiddlewareContext {
    pub client: Arc<dyn ChatClient>,
    pub kv: Arc<dyn KvStore>,
    pub access: AccessService,
    pub avatars: AvatarStore,
    pub cron: Arc<CronScheduler>,
    pub identity: BotIdentity,
    pub config: ParleyConfig,
    /// Process lifetime. Detached work should stop when it fires.
    pub cancel: CancellationToken,
}

impl MiddlewareContext {
    pub fn new(
        client: Arc<dyn ChatClient>,
        kv: Arc<dyn KvStore>,
        cron: Arc<CronScheduler>,
        identity: BotIdentity,
        config: ParleyConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            access: AccessService::new(Arc::clone(&kv), config.app.admin.clone()),
            avatars: AvatarStore::new(Arc::clone(&kv)),
            client,
            kv,
            cron,
            identity,
            config,
            cancel,
        }
    }

    /// Send `text` to `target`. Failures are logged and yield `None`.
    pub async fn send_text(&self, target: &str, text: &str) -> Option<MessageId> {
        match send_text(self.client.as_ref(), &SendTarget::new(target), text).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(target, error = %e, "failed to send text");
                None
            },
        }
    }

    /// Reply to wherever `msg` came from without waiting for the send.
    ///
    /// Sends may be paced by the platform client, so handlers never await
    /// them on the dispatch path.
    pub fn reply(self: &Arc<Self>, msg: &NormalizedMessage, text: impl Into<String>) {
        let ctx = Arc::clone(self);
        let target = msg.target().to_string();
        let text = text.into();
        self.spawn(async move {
            ctx.send_text(&target, &text).await;
        });
    }

    /// Run `work` off the dispatch loop. It is dropped when the process
    /// lifetime ends.
    pub fn spawn(&self, work: impl Future<Output = ()> + Send + 'static) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {},
                () = work => {},
            }
        });
    }

    pub async fn send_image(&self, target: &str, base64_content: &str) -> Option<MessageId> {
        match send_image(self.client.as_ref(), &SendTarget::new(target), base64_content).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(target, error = %e, "failed to send image");
                None
            },
        }
    }

    /// Post a placeholder for `msg` and return the sender for the final answer.
    pub async fn pending_reply(&self, msg: &NormalizedMessage) -> PendingReply {
        PendingReply::start(
            Arc::clone(&self.client),
            SendTarget::new(msg.target()),
            Some(msg.id.clone()),
        )
        .await
    }

    /// Display names for `ids`. Lookup failures are logged and give an
    /// empty map, so callers fall back to raw ids.
    pub async fn nicknames(&self, ids: &[String]) -> HashMap<String, String> {
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.client.get_contact_detail(ids).await {
            Ok(contacts) => contacts
                .into_iter()
                .map(|c| {
                    let name = c.display_name().to_string();
                    (c.username, name)
                })
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to get contact details");
                HashMap::new()
            },
        }
    }
}
