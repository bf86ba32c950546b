//! Outbound operations every platform binding provides.

use async_trait::async_trait;

use crate::{
    Result,
    card::OutboundCard,
    message::{MessageId, NormalizedMessage},
    target::SendTarget,
};

/// A user or group as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub username: String,
    pub nickname: String,
    pub avatar_url: String,
}

impl Contact {
    /// Nickname, or the username when the platform has none.
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.username
        } else {
            &self.nickname
        }
    }
}

/// Outbound chat API.
///
/// Platforms without a given capability return
/// [`crate::Error::Unsupported`]; callers such as [`crate::PendingReply`]
/// fall back accordingly.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// The bot account's own user id.
    fn self_id(&self) -> &str;

    async fn send_rich_card(&self, target: &SendTarget, card: &OutboundCard) -> Result<MessageId>;

    async fn reply_rich_card(
        &self,
        anchor: &str,
        target: &SendTarget,
        card: &OutboundCard,
    ) -> Result<MessageId>;

    async fn update_rich_card(&self, message_id: &str, card: &OutboundCard) -> Result<()>;

    async fn recall_message(&self, message_id: &str) -> Result<()>;

    /// Upload a base64 image and return the key to use in image blocks.
    async fn upload_image(&self, base64_content: &str) -> Result<String>;

    async fn get_contact_detail(&self, ids: &[String]) -> Result<Vec<Contact>>;

    /// Base64 content of the image carried by `message_id`.
    async fn download_message_image(&self, message_id: &str) -> Result<String>;

    /// Look up an earlier message. Platforms without history return `None`.
    async fn resolve_message(&self, _message_id: &str) -> Result<Option<NormalizedMessage>> {
        Ok(None)
    }
}

/// Send a one-block markdown card.
pub async fn send_text(client: &dyn ChatClient, target: &SendTarget, text: &str) -> Result<MessageId> {
    client
        .send_rich_card(target, &OutboundCard::new().markdown(text))
        .await
}

/// Upload `base64_content` and send it as a one-image card.
pub async fn send_image(
    client: &dyn ChatClient,
    target: &SendTarget,
    base64_content: &str,
) -> Result<MessageId> {
    let key = client.upload_image(base64_content).await?;
    client
        .send_rich_card(target, &OutboundCard::new().image(key, "image"))
        .await
}
