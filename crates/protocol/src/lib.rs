//! Automation backend WebSocket protocol.
//!
//! All frames are JSON text:
//! - [`Request`]   bridge → backend, one per forwarded chat message
//! - [`Response`]  backend → bridge, content to deliver to a chat target
//! - [`MetaEvent`] bridge → backend, handshake sent on every (re)connect

use std::collections::VecDeque;

use {
    serde::{Deserialize, Serialize},
    serde_json::Value,
    tracing::warn,
};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PLATFORM: &str = "wechat";
pub const IMPL_NAME: &str = "ComWechat";
pub const IMPL_VERSION: &str = "1.2.0";
pub const ONEBOT_VERSION: &str = "12";

/// Prefix some backends put in front of inline base64 image data.
pub const BASE64_SCHEME: &str = "base64://";

// ── Content ──────────────────────────────────────────────────────────────────

/// One raw content entry: `{"type": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            data: Value::String(text.into()),
        }
    }
}

/// Where an image item's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageData {
    Base64(String),
    Url(String),
}

impl ImageData {
    fn parse(raw: &str) -> Self {
        if let Some(b64) = raw.strip_prefix(BASE64_SCHEME) {
            Self::Base64(b64.to_string())
        } else if raw.starts_with("http://") || raw.starts_with("https://") {
            Self::Url(raw.to_string())
        } else {
            Self::Base64(raw.to_string())
        }
    }
}

/// A deliverable content item after flattening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    /// Trimmed, never empty.
    Text(String),
    Image(ImageData),
}

/// Expand `content` breadth-first into deliverable items.
///
/// `node` entries carry a list of further entries which are queued behind
/// everything already pending. Blank text is dropped; malformed and
/// unknown entries are logged and skipped.
pub fn flatten(content: &[MessageContent]) -> Vec<ContentItem> {
    let mut queue: VecDeque<MessageContent> = content.iter().cloned().collect();
    let mut items = Vec::new();
    while let Some(entry) = queue.pop_front() {
        match entry.kind.as_str() {
            "text" => match entry.data.as_str() {
                Some(text) => {
                    let text = text.trim();
                    if !text.is_empty() {
                        items.push(ContentItem::Text(text.to_string()));
                    }
                },
                None => warn!(data = %entry.data, "text content is not a string"),
            },
            "image" => match entry.data.as_str() {
                Some(raw) if !raw.is_empty() => items.push(ContentItem::Image(ImageData::parse(raw))),
                _ => warn!("image content is not a string"),
            },
            "node" => match entry.data.as_array() {
                Some(nodes) => {
                    for node in nodes {
                        match serde_json::from_value::<MessageContent>(node.clone()) {
                            Ok(child) => queue.push_back(child),
                            Err(e) => warn!(error = %e, "skipping malformed node entry"),
                        }
                    }
                },
                None => warn!("node content is not a list"),
            },
            other => warn!(kind = other, "unsupported content type"),
        }
    }
    items
}

// ── Frames ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Group,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub avatar: String,
}

/// A chat message forwarded to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub bot_self_id: String,
    pub msg_id: String,
    pub user_type: UserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub user_id: String,
    /// Permission level; always 0.
    #[serde(default)]
    pub user_pm: u8,
    pub content: Vec<MessageContent>,
    pub sender: Option<Sender>,
}

/// Content the backend wants delivered to `target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub bot_self_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<String>,
    #[serde(default)]
    pub target_type: String,
    pub target_id: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

impl Response {
    pub fn items(&self) -> Vec<ContentItem> {
        flatten(&self.content)
    }
}

// ── Meta events ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotVersion {
    #[serde(rename = "impl")]
    pub implementation: String,
    pub version: String,
    pub onebot_version: String,
}

impl Default for BotVersion {
    fn default() -> Self {
        Self {
            implementation: IMPL_NAME.into(),
            version: IMPL_VERSION.into(),
            onebot_version: ONEBOT_VERSION.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSelf {
    pub platform: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    pub online: bool,
    #[serde(rename = "self")]
    pub bot_self: BotSelf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub good: bool,
    pub bots: Vec<BotStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "detail_type", rename_all = "snake_case")]
pub enum MetaDetail {
    Connect {
        #[serde(rename = "self")]
        endpoint: String,
        version: BotVersion,
    },
    StatusUpdate {
        status: StatusUpdate,
    },
}

/// Handshake frame (`type: "meta"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Epoch millis.
    pub time: u64,
    pub sub_type: String,
    #[serde(flatten)]
    pub detail: MetaDetail,
}

impl MetaEvent {
    fn new(detail: MetaDetail) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: "meta".into(),
            time: parley_common::time::now_ms(),
            sub_type: String::new(),
            detail,
        }
    }

    /// `connect` event announcing the endpoint we connected to.
    pub fn connect(endpoint: impl Into<String>) -> Self {
        Self::new(MetaDetail::Connect {
            endpoint: endpoint.into(),
            version: BotVersion::default(),
        })
    }

    /// `status_update` event reporting `self_id` online.
    pub fn status_update(self_id: impl Into<String>) -> Self {
        Self::new(MetaDetail::StatusUpdate {
            status: StatusUpdate {
                good: true,
                bots: vec![BotStatus {
                    online: true,
                    bot_self: BotSelf {
                        platform: PLATFORM.into(),
                        user_id: self_id.into(),
                    },
                }],
            },
        })
    }
}
