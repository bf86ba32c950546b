//! Test doubles shared by the middleware tests.

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD},
    image::{DynamicImage, ImageFormat, Rgb, RgbImage},
    parley_channels::{
        CardBlock, ChatClient, Contact, Error as ChatError, MessageId, OutboundCard, Result,
        SendTarget,
    },
    parley_common::BotIdentity,
    parley_config::ParleyConfig,
    parley_cron::{CronScheduler, KvCronStore},
    parley_store::{KvStore, MemoryKvStore},
    tokio_util::sync::CancellationToken,
};

use crate::context::MiddlewareContext;

pub const ADMIN: &str = "wxid_admin";

/// Records every outbound card. Cannot edit messages; recalls are recorded.
#[derive(Default)]
pub struct RecordingClient {
    /// Time each send takes, like a rate-limited platform.
    send_delay: Duration,
    sent: Mutex<Vec<(String, OutboundCard)>>,
    recalled: Mutex<Vec<String>>,
    contacts: Mutex<Vec<Contact>>,
    images: Mutex<HashMap<String, String>>,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_send_delay(send_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            send_delay,
            ..Self::default()
        })
    }

    pub fn add_contact(&self, username: &str, nickname: &str, avatar_url: &str) {
        self.contacts.lock().unwrap_or_else(|e| e.into_inner()).push(Contact {
            username: username.into(),
            nickname: nickname.into(),
            avatar_url: avatar_url.into(),
        });
    }

    pub fn add_image(&self, message_id: &str, base64: &str) {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(message_id.into(), base64.into());
    }

    pub fn cards(&self) -> Vec<(String, OutboundCard)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Markdown text of every card sent to `target`, blocks joined by newlines.
    pub fn texts_to(&self, target: &str) -> Vec<String> {
        self.cards()
            .into_iter()
            .filter(|(t, _)| t == target)
            .map(|(_, card)| markdown_of(&card))
            .filter(|text| !text.is_empty())
            .collect()
    }

    /// Image keys sent to `target`, in order.
    pub fn images_to(&self, target: &str) -> Vec<String> {
        self.cards()
            .into_iter()
            .filter(|(t, _)| t == target)
            .flat_map(|(_, card)| card.blocks)
            .filter_map(|block| match block {
                CardBlock::Image { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn recalled(&self) -> Vec<String> {
        self.recalled.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Texts sent to `target` once there are at least `count` of them.
    pub async fn wait_for_texts(&self, target: &str, count: usize) -> Vec<String> {
        let texts = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let texts = self.texts_to(target);
                if texts.len() >= count {
                    return texts;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        match texts {
            Ok(texts) => texts,
            Err(_) => panic!("{target} got {:?}, wanted {count} texts", self.texts_to(target)),
        }
    }
}

/// A solid-color JPEG of the given size, base64 encoded.
pub fn jpeg_base64(width: u32, height: u32) -> String {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 120, 200])));
    let mut out = Cursor::new(Vec::new());
    if let Err(e) = img.write_to(&mut out, ImageFormat::Jpeg) {
        panic!("encode test image: {e}");
    }
    STANDARD.encode(out.into_inner())
}

pub fn markdown_of(card: &OutboundCard) -> String {
    card.blocks
        .iter()
        .filter_map(|block| match block {
            CardBlock::Markdown(text) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl ChatClient for RecordingClient {
    fn self_id(&self) -> &str {
        "wxid_bot"
    }

    async fn send_rich_card(&self, target: &SendTarget, card: &OutboundCard) -> Result<MessageId> {
        if !self.send_delay.is_zero() {
            tokio::time::sleep(self.send_delay).await;
        }
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push((target.id().to_string(), card.clone()));
        Ok(format!("out-{}", sent.len()))
    }

    async fn reply_rich_card(
        &self,
        _anchor: &str,
        target: &SendTarget,
        card: &OutboundCard,
    ) -> Result<MessageId> {
        self.send_rich_card(target, card).await
    }

    async fn update_rich_card(&self, _message_id: &str, _card: &OutboundCard) -> Result<()> {
        Err(ChatError::unsupported("update"))
    }

    async fn recall_message(&self, message_id: &str) -> Result<()> {
        self.recalled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message_id.to_string());
        Ok(())
    }

    async fn upload_image(&self, base64_content: &str) -> Result<String> {
        Ok(base64_content.to_string())
    }

    async fn get_contact_detail(&self, ids: &[String]) -> Result<Vec<Contact>> {
        let contacts = self.contacts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(contacts
            .iter()
            .filter(|c| ids.contains(&c.username))
            .cloned()
            .collect())
    }

    async fn download_message_image(&self, message_id: &str) -> Result<String> {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(message_id)
            .cloned()
            .ok_or_else(|| ChatError::unsupported("download"))
    }
}

pub fn test_config() -> ParleyConfig {
    let mut config = ParleyConfig::default();
    config.app.admin = ADMIN.into();
    config
}

pub fn test_context(client: Arc<RecordingClient>) -> Arc<MiddlewareContext> {
    test_context_with(client, test_config())
}

pub fn test_context_with(client: Arc<RecordingClient>, config: ParleyConfig) -> Arc<MiddlewareContext> {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let cancel = CancellationToken::new();
    let cron = Arc::new(CronScheduler::new(
        Arc::new(KvCronStore::new(Arc::clone(&kv))),
        &cancel,
    ));
    Arc::new(MiddlewareContext::new(
        client,
        kv,
        cron,
        BotIdentity::new("wxid_bot", "parley", "wechat"),
        config,
        cancel,
    ))
}
