//! Sync frame → [`NormalizedMessage`].

use {
    parley_channels::{MessageKind, NormalizedMessage},
    tracing::warn,
};

use crate::types::{CHATROOM_SUFFIX, MessageType, SyncMessage};

/// Separator between the sender id and the text of a group message.
const GROUP_SENDER_SEPARATOR: &str = ":\n";

/// Translate a sync frame.
///
/// Frames without a sender, and echoes of the bot's own messages, yield
/// `None`.
pub fn normalize(msg: &SyncMessage, self_id: &str) -> Option<NormalizedMessage> {
    let from = msg.from_user_name.str.trim();
    if from.is_empty() {
        return None;
    }
    if !self_id.is_empty() && from == self_id {
        return None;
    }

    let kind = match msg.message_type() {
        MessageType::Text => MessageKind::Text,
        MessageType::Image => MessageKind::Image,
        _ => MessageKind::Other,
    };
    let id = msg.msg_id.to_string();

    if !from.ends_with(CHATROOM_SUFFIX) {
        let normalized = NormalizedMessage::new(id, kind, from, msg.content.str.clone()).mentioned(true);
        return Some(normalized);
    }

    let (sender, content) = match msg.content.str.split_once(GROUP_SENDER_SEPARATOR) {
        Some((sender, content)) if !sender.is_empty() => (sender, content),
        _ => {
            warn!(group = from, "group message without sender prefix");
            (from, msg.content.str.as_str())
        },
    };
    if !self_id.is_empty() && sender == self_id {
        return None;
    }
    let mentioned = at_user_list(&msg.msg_source).any(|user| user == self_id);
    Some(
        NormalizedMessage::new(id, kind, sender, content)
            .in_group(from)
            .mentioned(mentioned),
    )
}

/// Users mentioned in a message's `msg_source` XML.
fn at_user_list(msg_source: &str) -> impl Iterator<Item = &str> {
    let list = msg_source
        .split_once("<atuserlist>")
        .and_then(|(_, rest)| rest.split_once("</atuserlist>"))
        .map(|(list, _)| list)
        .unwrap_or_default();
    let list = list
        .trim()
        .trim_start_matches("<![CDATA[")
        .trim_end_matches("]]>");
    list.split(',').map(str::trim).filter(|user| !user.is_empty())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::StrWrapper, rstest::rstest};

    fn frame(from: &str, msg_type: i64, content: &str) -> SyncMessage {
        SyncMessage {
            msg_id: 42,
            msg_type,
            from_user_name: StrWrapper { str: from.into() },
            to_user_name: StrWrapper {
                str: "wxid_bot".into(),
            },
            content: StrWrapper {
                str: content.into(),
            },
            ..SyncMessage::default()
        }
    }

    #[test]
    fn private_text() {
        let msg = normalize(&frame("wxid_u1", 1, "#help"), "wxid_bot").unwrap();
        assert_eq!(msg.id, "42");
        assert_eq!(msg.user_id, "wxid_u1");
        assert_eq!(msg.target(), "wxid_u1");
        assert!(msg.is_text());
        assert!(msg.is_mentioned);
        assert_eq!(msg.text_content(), "#help");
    }

    #[test]
    fn group_text_splits_sender() {
        let mut raw = frame("g1@chatroom", 1, "wxid_u1:\n#jiadan -t 2");
        raw.msg_source =
            "<msgsource><atuserlist><![CDATA[wxid_x,wxid_bot]]></atuserlist></msgsource>".into();
        let msg = normalize(&raw, "wxid_bot").unwrap();
        assert_eq!(msg.user_id, "wxid_u1");
        assert_eq!(msg.group_id.as_deref(), Some("g1@chatroom"));
        assert_eq!(msg.target(), "g1@chatroom");
        assert_eq!(msg.text_content(), "#jiadan -t 2");
        assert!(msg.is_mentioned);
    }

    #[test]
    fn group_without_prefix_keeps_group_as_sender() {
        let msg = normalize(&frame("g1@chatroom", 10000, "someone joined"), "wxid_bot").unwrap();
        assert_eq!(msg.user_id, "g1@chatroom");
        assert_eq!(msg.kind, MessageKind::Other);
        assert!(!msg.is_mentioned);
    }

    #[rstest]
    #[case(1, MessageKind::Text)]
    #[case(3, MessageKind::Image)]
    #[case(47, MessageKind::Other)]
    #[case(49, MessageKind::Other)]
    fn maps_message_types(#[case] msg_type: i64, #[case] kind: MessageKind) {
        assert_eq!(normalize(&frame("wxid_u1", msg_type, "x"), "bot").unwrap().kind, kind);
    }

    #[test]
    fn drops_own_and_anonymous_frames() {
        assert!(normalize(&frame("", 1, "x"), "wxid_bot").is_none());
        assert!(normalize(&frame("wxid_bot", 1, "x"), "wxid_bot").is_none());
        assert!(normalize(&frame("g1@chatroom", 1, "wxid_bot:\nx"), "wxid_bot").is_none());
    }

    #[test]
    fn parses_plain_at_list() {
        let users: Vec<_> = at_user_list("<atuserlist> a, b ,</atuserlist>").collect();
        assert_eq!(users, vec!["a", "b"]);
        assert_eq!(at_user_list("<msgsource/>").count(), 0);
    }
}
