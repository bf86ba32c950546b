//! Provider API payloads.

use serde::{Deserialize, Serialize};

/// Group ids end with this suffix.
pub const CHATROOM_SUFFIX: &str = "@chatroom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Text,
    Image,
    Emoji,
    App,
    Other(i64),
}

impl From<i64> for MessageType {
    fn from(code: i64) -> Self {
        match code {
            1 => Self::Text,
            3 => Self::Image,
            47 => Self::Emoji,
            49 => Self::App,
            other => Self::Other(other),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrWrapper {
    #[serde(default)]
    pub str: String,
}

/// Thumbnail bytes the sync socket attaches to image messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageBuf {
    #[serde(default)]
    pub len: u64,
    #[serde(default)]
    pub buffer: String,
}

/// One frame from the sync socket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncMessage {
    #[serde(default)]
    pub msg_id: i64,
    #[serde(default)]
    pub new_msg_id: i64,
    #[serde(default)]
    pub msg_type: i64,
    #[serde(default)]
    pub from_user_name: StrWrapper,
    #[serde(default)]
    pub to_user_name: StrWrapper,
    #[serde(default)]
    pub content: StrWrapper,
    #[serde(default)]
    pub push_content: String,
    #[serde(default)]
    pub msg_source: String,
    #[serde(default, alias = "image_buf")]
    pub img_buf: ImageBuf,
    #[serde(default)]
    pub create_time: i64,
}

impl SyncMessage {
    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.msg_type)
    }
}

/// Envelope every API call answers with.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResult<T> {
    #[serde(rename = "Code", default)]
    pub code: i64,
    #[serde(rename = "Data", default)]
    pub data: Option<T>,
    #[serde(rename = "Text", default)]
    pub text: String,
}

impl<T> ApiResult<T> {
    /// `200` is success; a missing code is treated the same.
    pub fn is_ok(&self) -> bool {
        self.code == 200 || self.code == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageItem {
    pub to_user_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text_content: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image_content: String,
    pub msg_type: u8,
    #[serde(rename = "AtWxIDList", skip_serializing_if = "Vec::is_empty")]
    pub at_wxid_list: Vec<String>,
}

impl MessageItem {
    pub fn text(to: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to_user_name: to.into(),
            text_content: text.into(),
            image_content: String::new(),
            msg_type: 1,
            at_wxid_list: Vec::new(),
        }
    }

    pub fn image(to: impl Into<String>, base64_content: impl Into<String>) -> Self {
        Self {
            to_user_name: to.into(),
            text_content: String::new(),
            image_content: base64_content.into(),
            msg_type: 2,
            at_wxid_list: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SendMessageModel {
    #[serde(rename = "MsgItem")]
    pub msg_item: Vec<MessageItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchGetContactModel {
    #[serde(rename = "UserNames")]
    pub user_names: Vec<String>,
    #[serde(rename = "RoomWxIDList")]
    pub room_wxid_list: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GetChatRoomInfoModel {
    #[serde(rename = "ChatRoomWxIdList")]
    pub chat_room_wxid_list: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetail {
    #[serde(default)]
    pub user_name: StrWrapper,
    #[serde(default)]
    pub nick_name: StrWrapper,
    #[serde(default)]
    pub big_head_img_url: String,
    #[serde(default)]
    pub small_head_img_url: String,
}

impl From<ContactDetail> for parley_channels::Contact {
    fn from(detail: ContactDetail) -> Self {
        Self {
            username: detail.user_name.str,
            nickname: detail.nick_name.str,
            avatar_url: detail.small_head_img_url,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactList {
    #[serde(default)]
    pub contact_count: i64,
    #[serde(default)]
    pub contact_list: Vec<ContactDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginStatus {
    #[serde(default)]
    pub login_state: i64,
    #[serde(default)]
    pub login_err_msg: String,
    #[serde(default)]
    pub expiry_time: String,
    #[serde(default)]
    pub online_days: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginQrCode {
    #[serde(rename = "QrCodeUrl", default)]
    pub qr_code_url: String,
}
