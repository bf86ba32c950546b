//! Forwarding between the chat platform and the automation backend.
//!
//! Command-like messages go out as [`Request`] frames on the bridge's own
//! transport; every [`Response`] frame is flattened into one card and sent
//! to its target, replacing an outstanding placeholder when there is one.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    parley_channels::{
        CardBlock, NormalizedMessage, OutboundCard, PendingReply, SendTarget, is_forwardable,
    },
    parley_protocol::{
        ContentItem, ImageData, MessageContent, MetaEvent, Request, Response, Sender, UserType,
    },
    parley_store::IdempotencyStore,
    parley_transport::{Connector, Transport, WsConnector},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{Middleware, MiddlewareContext, Result};

/// Commands after which the sender's avatar is refreshed from the platform.
const AVATAR_REFRESH_COMMANDS: [&str; 4] =
    ["refresh-avatar", "refresh-panel", "更新头像", "更新面板"];

/// Prefix that forces forwarding of text the backend would not otherwise see.
const RAW_PREFIX: &str = "#!";

pub type AutomationTransport = Transport<Response>;

pub struct BridgeMiddleware {
    inner: Arc<BridgeInner>,
    transport: AutomationTransport,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct BridgeInner {
    ctx: Arc<MiddlewareContext>,
    seen: IdempotencyStore,
    http: reqwest::Client,
    placeholder: bool,
    placeholder_timeout: Duration,
    /// Outstanding placeholder per target.
    pending: tokio::sync::Mutex<HashMap<String, PendingReply>>,
}

pub fn factory(ctx: &Arc<MiddlewareContext>) -> Option<Box<dyn Middleware>> {
    let server = ctx.config.automation.server.trim();
    if server.is_empty() {
        info!("automation backend not configured, bridge disabled");
        return None;
    }
    match BridgeMiddleware::new(Arc::clone(ctx), WsConnector::new(server)) {
        Ok(bridge) => Some(Box::new(bridge)),
        Err(e) => {
            error!(error = %e, "failed to build bridge");
            None
        },
    }
}

fn is_avatar_refresh(text: &str) -> bool {
    text.strip_prefix(['#', '*', '%'])
        .is_some_and(|rest| AVATAR_REFRESH_COMMANDS.iter().any(|c| rest.starts_with(c)))
}

async fn send_handshake(transport: &AutomationTransport, self_id: &str) {
    if let Err(e) = transport.send(&MetaEvent::connect(transport.endpoint())).await {
        warn!(error = %e, "failed to send connect event");
        return;
    }
    if let Err(e) = transport.send(&MetaEvent::status_update(self_id)).await {
        warn!(error = %e, "failed to send status update");
    }
}

impl BridgeMiddleware {
    pub fn new(ctx: Arc<MiddlewareContext>, connector: impl Connector + 'static) -> Result<Self> {
        let self_id = ctx.identity.self_id.clone();
        let transport = Transport::builder(connector)
            .on_connect(move |t: AutomationTransport| {
                let self_id = self_id.clone();
                async move { send_handshake(&t, &self_id).await }
            })
            .build();

        let automation = &ctx.config.automation;
        let inner = BridgeInner {
            seen: IdempotencyStore::new(
                Arc::clone(&ctx.kv),
                "bridge",
                IdempotencyStore::DEFAULT_TTL,
            ),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            placeholder: automation.placeholder,
            placeholder_timeout: Duration::from_secs(automation.placeholder_timeout_secs),
            pending: tokio::sync::Mutex::new(HashMap::new()),
            ctx,
        };
        let cancel = inner.ctx.cancel.child_token();
        Ok(Self {
            inner: Arc::new(inner),
            transport,
            cancel,
            task: Mutex::new(None),
        })
    }

    pub fn transport(&self) -> &AutomationTransport {
        &self.transport
    }
}

impl BridgeInner {
    async fn build_request(&self, msg: &NormalizedMessage) -> Request {
        let text = msg.text_content();
        let content = text.strip_prefix(RAW_PREFIX).unwrap_or(text);
        let avatar = match self.ctx.avatars.get(&msg.user_id).await {
            Ok(avatar) => avatar,
            Err(e) => {
                warn!(user = %msg.user_id, error = %e, "failed to read avatar");
                None
            },
        };
        Request {
            bot_self_id: self.ctx.identity.self_id.clone(),
            msg_id: msg.id.clone(),
            user_type: if msg.is_group() {
                UserType::Group
            } else {
                UserType::Direct
            },
            group_id: msg.group_id.clone(),
            user_id: msg.user_id.clone(),
            user_pm: 0,
            content: vec![MessageContent::text(content)],
            sender: avatar.map(|avatar| Sender { avatar }),
        }
    }

    /// Replace the stored avatar of `user_id` with their platform head image.
    async fn refresh_avatar(&self, user_id: &str, target: &str) {
        let contacts = match self
            .ctx
            .client
            .get_contact_detail(&[user_id.to_string()])
            .await
        {
            Ok(contacts) => contacts,
            Err(e) => {
                error!(user = %user_id, error = %e, "failed to get contact details");
                return;
            },
        };
        for contact in contacts.iter().filter(|c| !c.avatar_url.is_empty()) {
            let content = match self.download(&contact.avatar_url).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(user = %contact.username, url = %contact.avatar_url, error = %e, "failed to download avatar");
                    continue;
                },
            };
            if let Err(e) = self.ctx.avatars.save(&contact.username, &content).await {
                warn!(user = %contact.username, error = %e, "failed to save avatar");
            }
        }
        self.ctx.send_text(target, "avatar refreshed").await;
    }

    /// Post the placeholder, then hand the request to the backend.
    async fn forward(
        self: Arc<Self>,
        transport: AutomationTransport,
        msg: NormalizedMessage,
        request: Request,
    ) {
        if self.placeholder {
            self.open_pending(&msg).await;
        }
        match transport.send(&request).await {
            Ok(()) => debug!(id = %msg.id, target = %msg.target(), "forwarded to automation backend"),
            Err(e) => {
                warn!(id = %msg.id, error = %e, "failed to forward to automation backend");
                self.drop_pending(msg.target()).await;
            },
        }
    }

    /// Post a placeholder for `msg` and recall it if no response replaces
    /// it within the timeout.
    async fn open_pending(self: &Arc<Self>, msg: &NormalizedMessage) {
        let reply = self.ctx.pending_reply(msg).await;
        let Some(placeholder) = reply.placeholder().map(str::to_string) else {
            return;
        };
        let target = msg.target().to_string();
        let replaced = self.pending.lock().await.insert(target.clone(), reply);
        if let Some(mut old) = replaced {
            old.recall_placeholder().await;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = inner.ctx.cancel.cancelled() => return,
                _ = tokio::time::sleep(inner.placeholder_timeout) => {},
            }
            let stale = {
                let mut pending = inner.pending.lock().await;
                let unchanged = pending
                    .get(&target)
                    .and_then(PendingReply::placeholder)
                    .is_some_and(|id| id == placeholder);
                if unchanged {
                    pending.remove(&target)
                } else {
                    None
                }
            };
            if let Some(mut reply) = stale {
                debug!(target = %target, "recalling unanswered placeholder");
                reply.recall_placeholder().await;
            }
        });
    }

    async fn drop_pending(&self, target: &str) {
        let removed = self.pending.lock().await.remove(target);
        if let Some(mut reply) = removed {
            reply.recall_placeholder().await;
        }
    }

    async fn on_response(&self, resp: Response) {
        if resp.target_id.is_empty() {
            warn!(msg_id = ?resp.msg_id, "response without a target");
            return;
        }
        let items = resp.items();
        if items.is_empty() {
            debug!(target = %resp.target_id, "empty response");
            return;
        }

        let mut card = OutboundCard::new();
        for item in items {
            match item {
                ContentItem::Text(text) => card.push(CardBlock::Markdown(text)),
                ContentItem::Image(data) => {
                    if let Some(key) = self.image_key(data).await {
                        card.push(CardBlock::Image {
                            key,
                            alt: String::new(),
                        });
                    }
                },
            }
        }
        if card.is_empty() {
            warn!(target = %resp.target_id, "nothing deliverable in response");
            return;
        }

        let pending = self.pending.lock().await.remove(&resp.target_id);
        let delivered = match pending {
            Some(mut reply) => reply.send_rich_card(&card).await.map(|_| ()),
            None => self
                .ctx
                .client
                .send_rich_card(&SendTarget::new(&resp.target_id), &card)
                .await
                .map(|_| ()),
        };
        match delivered {
            Ok(()) => debug!(target = %resp.target_id, blocks = card.blocks.len(), "response delivered"),
            Err(e) => error!(target = %resp.target_id, error = %e, "failed to deliver response"),
        }
    }

    async fn image_key(&self, data: ImageData) -> Option<String> {
        let base64 = match data {
            ImageData::Base64(content) => content,
            ImageData::Url(url) => match self.download(&url).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(url = %url, error = %e, "failed to download response image");
                    return None;
                },
            },
        };
        match self.ctx.client.upload_image(&base64).await {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(error = %e, "failed to upload response image");
                None
            },
        }
    }

    async fn download(&self, url: &str) -> Result<String> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        Ok(STANDARD.encode(bytes))
    }
}

#[async_trait]
impl Middleware for BridgeMiddleware {
    fn name(&self) -> &'static str {
        "bridge"
    }

    async fn start(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let transport = self.transport.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let run = transport.run(cancel, move |resp: Response| {
                let inner = Arc::clone(&inner);
                async move { inner.on_response(resp).await }
            });
            if let Err(e) = run.await {
                error!(error = %e, "automation transport stopped");
            }
        });
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        info!(url = %self.transport.endpoint(), "bridge started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "automation transport task failed");
            }
        }
        let outstanding: Vec<PendingReply> =
            self.inner.pending.lock().await.drain().map(|(_, r)| r).collect();
        for mut reply in outstanding {
            reply.recall_placeholder().await;
        }
        Ok(())
    }

    async fn on_message(&self, msg: &NormalizedMessage) -> Result<bool> {
        let text = msg.text_content();
        if !is_forwardable(text) {
            return Ok(false);
        }
        if !self.inner.seen.try_seen(&msg.id).await {
            return Ok(false);
        }
        if is_avatar_refresh(text) {
            let inner = Arc::clone(&self.inner);
            let user_id = msg.user_id.clone();
            let target = msg.target().to_string();
            self.inner
                .ctx
                .spawn(async move { inner.refresh_avatar(&user_id, &target).await });
        }

        let request = self.inner.build_request(msg).await;
        let forward = Arc::clone(&self.inner).forward(self.transport.clone(), msg.clone(), request);
        self.inner.ctx.spawn(forward);
        Ok(false)
    }
}
