//! Inbound message shape shared by every platform.

use std::sync::Arc;

use {tokio::sync::OnceCell, tracing::warn};

use crate::client::ChatClient;

/// Platform message id.
pub type MessageId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Other,
}

/// A message after translation from the platform payload.
///
/// `target` is the group id for group messages and the sender id
/// otherwise; adapters drop payloads with no sender, so it is never empty.
#[derive(Debug, Clone)]
pub struct NormalizedMessage {
    pub id: MessageId,
    pub kind: MessageKind,
    /// Raw platform content (XML for images on some platforms).
    pub content: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub is_mentioned: bool,
    pub refer_to: Option<MessageId>,
    referred: OnceCell<Option<Arc<NormalizedMessage>>>,
}

impl NormalizedMessage {
    pub fn new(
        id: impl Into<MessageId>,
        kind: MessageKind,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            user_id: user_id.into(),
            group_id: None,
            is_mentioned: false,
            refer_to: None,
            referred: OnceCell::new(),
        }
    }

    pub fn text(id: impl Into<MessageId>, user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageKind::Text, user_id, text)
    }

    #[must_use]
    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        let group_id = group_id.into();
        self.group_id = (!group_id.is_empty()).then_some(group_id);
        self
    }

    #[must_use]
    pub fn mentioned(mut self, is_mentioned: bool) -> Self {
        self.is_mentioned = is_mentioned;
        self
    }

    #[must_use]
    pub fn replying_to(mut self, refer_to: impl Into<MessageId>) -> Self {
        self.refer_to = Some(refer_to.into());
        self
    }

    /// Group id if this is a group message, else the sender id.
    pub fn target(&self) -> &str {
        self.group_id.as_deref().unwrap_or(&self.user_id)
    }

    pub fn is_group(&self) -> bool {
        self.group_id.is_some()
    }

    pub fn is_text(&self) -> bool {
        self.kind == MessageKind::Text
    }

    pub fn is_image(&self) -> bool {
        self.kind == MessageKind::Image
    }

    /// Trimmed text for text messages, empty for everything else.
    pub fn text_content(&self) -> &str {
        if self.is_text() {
            self.content.trim()
        } else {
            ""
        }
    }

    /// The replied-to message, resolved through `client` on first use.
    ///
    /// Lookups happen at most once per message; failures are logged and
    /// cached as "no reference".
    pub async fn referred_message(&self, client: &dyn ChatClient) -> Option<Arc<NormalizedMessage>> {
        let refer_to = self.refer_to.as_deref()?;
        self.referred
            .get_or_init(|| async move {
                match client.resolve_message(refer_to).await {
                    Ok(found) => found.map(Arc::new),
                    Err(e) => {
                        warn!(message_id = refer_to, error = %e, "failed to resolve referenced message");
                        None
                    },
                }
            })
            .await
            .clone()
    }
}
