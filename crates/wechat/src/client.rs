//! HTTP API client and [`ChatClient`] implementation.

use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};

use {
    async_trait::async_trait,
    parley_channels::{
        ChatClient, Contact, MessageId, OutboundCard, SendTarget, Error as ChatError,
        Result as ChatResult,
    },
    secrecy::{ExposeSecret, Secret},
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    tokio::time::Instant,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    error::into_chat,
    render::{Outgoing, render_card},
    types::{
        ApiResult, BatchGetContactModel, CHATROOM_SUFFIX, ContactList, GetChatRoomInfoModel,
        LoginQrCode, LoginStatus, MessageItem, SendMessageModel,
    },
};

/// Minimum gap between two outbound sends.
const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Image thumbnails kept for [`ChatClient::download_message_image`].
const IMAGE_CACHE_CAPACITY: usize = 32;

pub struct WechatClientBuilder {
    server: String,
    token: Secret<String>,
    self_id: String,
    send_interval: Duration,
    timeout: Duration,
}

impl WechatClientBuilder {
    /// Pause between sends. The provider drops bursts.
    pub fn send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<WechatClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(WechatClient {
            http,
            server: self.server.trim_end_matches('/').to_string(),
            token: self.token,
            self_id: self.self_id,
            send_interval: self.send_interval,
            last_send: tokio::sync::Mutex::new(None),
            images: Mutex::new(VecDeque::new()),
        })
    }
}

/// Provider HTTP API.
///
/// The provider has no message editing, recall or history, so those
/// operations return [`ChatError::Unsupported`]. Images can only be
/// "downloaded" while their thumbnail from the sync socket is cached.
pub struct WechatClient {
    http: reqwest::Client,
    server: String,
    token: Secret<String>,
    self_id: String,
    send_interval: Duration,
    last_send: tokio::sync::Mutex<Option<Instant>>,
    images: Mutex<VecDeque<(String, String)>>,
}

impl WechatClient {
    pub fn builder(
        server: impl Into<String>,
        token: Secret<String>,
        self_id: impl Into<String>,
    ) -> WechatClientBuilder {
        WechatClientBuilder {
            server: server.into(),
            token,
            self_id: self_id.into(),
            send_interval: DEFAULT_SEND_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    // ── API calls ───────────────────────────────────────────────────────

    pub async fn send_text_message(&self, items: Vec<MessageItem>) -> Result<Value> {
        self.send_items("/message/SendTextMessage", items).await
    }

    pub async fn send_image_message(&self, items: Vec<MessageItem>) -> Result<Value> {
        self.send_items("/message/SendImageNewMessage", items).await
    }

    pub async fn user_contact_details(&self, users: Vec<String>) -> Result<ContactList> {
        let body = BatchGetContactModel {
            user_names: users,
            room_wxid_list: Vec::new(),
        };
        self.post::<_, ContactList>("/friend/GetContactDetailsList", &body)
            .await
            .map(Option::unwrap_or_default)
    }

    pub async fn chat_room_info(&self, rooms: Vec<String>) -> Result<ContactList> {
        let body = GetChatRoomInfoModel {
            chat_room_wxid_list: rooms,
        };
        self.post::<_, ContactList>("/group/GetChatRoomInfo", &body)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Current login state. An API-level failure means "not logged in".
    pub async fn login_status(&self) -> Result<Option<LoginStatus>> {
        match self.get::<LoginStatus>("/login/GetLoginStatus").await {
            Ok(status) => Ok(status),
            Err(Error::Api { code, text, .. }) => {
                debug!(code, text = %text, "not logged in");
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    pub async fn wake_up_login(&self) -> Result<()> {
        self.post::<_, Value>("/login/WakeUpLogin", &serde_json::json!({}))
            .await
            .map(|_| ())
    }

    pub async fn login_qr_code(&self) -> Result<LoginQrCode> {
        self.post::<_, LoginQrCode>("/login/GetLoginQrCodeNew", &serde_json::json!({}))
            .await
            .map(Option::unwrap_or_default)
    }

    /// Keep the thumbnail of an inbound image for later download.
    pub fn remember_image(&self, message_id: &str, base64_content: &str) {
        if base64_content.is_empty() {
            return;
        }
        let mut images = self.images.lock().unwrap_or_else(|e| e.into_inner());
        images.retain(|(id, _)| id != message_id);
        if images.len() >= IMAGE_CACHE_CAPACITY {
            images.pop_front();
        }
        images.push_back((message_id.to_string(), base64_content.to_string()));
    }

    // ── Internal ────────────────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}{path}", self.server))?;
        url.query_pairs_mut()
            .append_pair("key", self.token.expose_secret());
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self.http.get(self.url(path)?).send().await?;
        Self::decode(path, resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>> {
        let resp = self.http.post(self.url(path)?).json(body).send().await?;
        Self::decode(path, resp).await
    }

    async fn decode<T: DeserializeOwned>(path: &str, resp: reqwest::Response) -> Result<Option<T>> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body: body.chars().take(1000).collect(),
            });
        }
        let result: ApiResult<T> = resp.json().await?;
        if !result.is_ok() {
            return Err(Error::Api {
                path: path.to_string(),
                code: result.code,
                text: result.text,
            });
        }
        Ok(result.data)
    }

    async fn send_items(&self, path: &str, items: Vec<MessageItem>) -> Result<Value> {
        if items.is_empty() {
            return Err(Error::message("messages cannot be empty"));
        }
        self.pace().await;
        let body = SendMessageModel { msg_item: items };
        self.post::<_, Value>(path, &body)
            .await
            .map(Option::unwrap_or_default)
    }

    /// Wait until `send_interval` has passed since the previous send.
    async fn pace(&self) {
        let mut last = self.last_send.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.send_interval).await;
        }
        *last = Some(Instant::now());
    }
}

/// Best-effort message id from a send response.
fn message_id(data: &Value) -> MessageId {
    let first = data.as_array().and_then(|items| items.first()).unwrap_or(data);
    ["newMsgId", "NewMsgId", "msgId", "MsgId"]
        .iter()
        .find_map(|key| match first.get(key)? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

#[async_trait]
impl ChatClient for WechatClient {
    fn self_id(&self) -> &str {
        &self.self_id
    }

    async fn send_rich_card(&self, target: &SendTarget, card: &OutboundCard) -> ChatResult<MessageId> {
        let mut last_id = MessageId::new();
        for outgoing in render_card(card) {
            let data = match outgoing {
                Outgoing::Text(text) => self
                    .send_text_message(vec![MessageItem::text(target.id(), text)])
                    .await
                    .map_err(into_chat("send text"))?,
                Outgoing::Image(content) => self
                    .send_image_message(vec![MessageItem::image(target.id(), content)])
                    .await
                    .map_err(into_chat("send image"))?,
            };
            last_id = message_id(&data);
        }
        Ok(last_id)
    }

    /// The provider has no threaded replies; the card is sent to the target.
    async fn reply_rich_card(
        &self,
        anchor: &str,
        target: &SendTarget,
        card: &OutboundCard,
    ) -> ChatResult<MessageId> {
        debug!(anchor, target = %target, "replies are sent as plain messages");
        self.send_rich_card(target, card).await
    }

    async fn update_rich_card(&self, _message_id: &str, _card: &OutboundCard) -> ChatResult<()> {
        Err(ChatError::unsupported("update message"))
    }

    async fn recall_message(&self, _message_id: &str) -> ChatResult<()> {
        Err(ChatError::unsupported("recall message"))
    }

    /// Images are sent inline, so the base64 payload is its own key.
    async fn upload_image(&self, base64_content: &str) -> ChatResult<String> {
        if base64_content.is_empty() {
            return Err(ChatError::invalid_input("empty image"));
        }
        Ok(base64_content.to_string())
    }

    async fn get_contact_detail(&self, ids: &[String]) -> ChatResult<Vec<Contact>> {
        let (rooms, users): (Vec<String>, Vec<String>) = ids
            .iter()
            .cloned()
            .partition(|id| id.ends_with(CHATROOM_SUFFIX));
        let mut contacts = Vec::new();
        if !users.is_empty() {
            let list = self
                .user_contact_details(users)
                .await
                .map_err(into_chat("get contact details"))?;
            contacts.extend(list.contact_list.into_iter().map(Contact::from));
        }
        if !rooms.is_empty() {
            let list = self
                .chat_room_info(rooms)
                .await
                .map_err(into_chat("get chat room info"))?;
            contacts.extend(list.contact_list.into_iter().map(Contact::from));
        }
        Ok(contacts)
    }

    async fn download_message_image(&self, message_id: &str) -> ChatResult<String> {
        let images = self.images.lock().unwrap_or_else(|e| e.into_inner());
        match images.iter().rev().find(|(id, _)| id == message_id) {
            Some((_, content)) => Ok(content.clone()),
            None => {
                warn!(message_id, "image not cached");
                Err(ChatError::unsupported("download image"))
            },
        }
    }
}
