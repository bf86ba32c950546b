//! Progressive replies for slow operations.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Result,
    card::OutboundCard,
    client::ChatClient,
    message::MessageId,
    target::SendTarget,
};

/// Text of the placeholder sent by [`PendingReply::start`].
pub const PLACEHOLDER_TEXT: &str = "Working on it...";

/// One turn's reply, optionally preceded by a placeholder message.
///
/// The first [`PendingReply::send_rich_card`] replaces the placeholder:
/// in place when the platform can edit messages, otherwise by recalling it
/// and sending fresh. Later sends are always fresh.
pub struct PendingReply {
    client: Arc<dyn ChatClient>,
    target: SendTarget,
    anchor: Option<MessageId>,
    placeholder: Option<MessageId>,
}

impl PendingReply {
    /// A reply with no placeholder.
    pub fn new(client: Arc<dyn ChatClient>, target: SendTarget, anchor: Option<MessageId>) -> Self {
        Self {
            client,
            target,
            anchor,
            placeholder: None,
        }
    }

    /// Send a placeholder right away, as a reply to `anchor` when set.
    ///
    /// A failed placeholder send is logged and the reply continues without
    /// one.
    pub async fn start(
        client: Arc<dyn ChatClient>,
        target: SendTarget,
        anchor: Option<MessageId>,
    ) -> Self {
        let mut reply = Self::new(client, target, anchor);
        let card = OutboundCard::new().markdown(PLACEHOLDER_TEXT);
        match reply.send_fresh(&card).await {
            Ok(id) if !id.is_empty() => reply.placeholder = Some(id),
            Ok(_) => debug!(target = %reply.target, "placeholder sent without an id"),
            Err(e) => warn!(target = %reply.target, error = %e, "failed to send placeholder"),
        }
        reply
    }

    pub fn target(&self) -> &SendTarget {
        &self.target
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.placeholder.as_deref()
    }

    pub fn anchor(&self) -> Option<&str> {
        self.anchor.as_deref()
    }

    /// Deliver `card`, consuming the placeholder if one is outstanding.
    ///
    /// Returns the id of the message now showing the card, or `None` for
    /// an empty card.
    pub async fn send_rich_card(&mut self, card: &OutboundCard) -> Result<Option<MessageId>> {
        if card.is_empty() {
            return Ok(None);
        }
        if let Some(placeholder) = self.placeholder.take() {
            match self.client.update_rich_card(&placeholder, card).await {
                Ok(()) => return Ok(Some(placeholder)),
                Err(e) => {
                    debug!(message_id = %placeholder, error = %e, "placeholder update failed, sending fresh");
                    self.recall(&placeholder).await;
                },
            }
        }
        self.send_fresh(card).await.map(Some)
    }

    pub async fn send_markdown(&mut self, text: &str) -> Result<Option<MessageId>> {
        self.send_rich_card(&OutboundCard::new().markdown(text)).await
    }

    pub async fn upload_image(&self, base64_content: &str) -> Result<String> {
        self.client.upload_image(base64_content).await
    }

    /// Recall the placeholder if it was never replaced.
    pub async fn recall_placeholder(&mut self) {
        if let Some(placeholder) = self.placeholder.take() {
            self.recall(&placeholder).await;
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn send_fresh(&self, card: &OutboundCard) -> Result<MessageId> {
        match &self.anchor {
            Some(anchor) => self.client.reply_rich_card(anchor, &self.target, card).await,
            None => self.client.send_rich_card(&self.target, card).await,
        }
    }

    async fn recall(&self, message_id: &str) {
        if let Err(e) = self.client.recall_message(message_id).await {
            warn!(message_id, error = %e, "failed to recall placeholder");
        }
    }
}
