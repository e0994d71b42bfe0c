use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    rooms::Identity,
    store::{Draft, Message, MessageKind},
};

/// Frames a client sends, `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate(Credentials),
    JoinPrivate(PeerPayload),
    PrivateMessage(MessagePayload),
    Typing(PeerPayload),
    StopTyping(PeerPayload),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub token: Option<String>,
    pub username: Option<String>,
}

/// `from` is optional; when present it has to match the session identity.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerPayload {
    pub from: Option<String>,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub from: Option<String>,
    pub to: String,
    pub text: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<MessageKind>,
    pub image_url: Option<String>,
}

impl MessagePayload {
    pub fn draft(&self) -> Draft {
        Draft {
            kind: self.kind.unwrap_or_default(),
            text: self.text.clone(),
            image_url: self.image_url.clone(),
        }
    }
}

/// Frames the relay pushes to a connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    OnlineUsers(Vec<Identity>),
    PrivateHistory(Vec<Message>),
    PrivateMessage(Message),
    #[serde(rename_all = "camelCase")]
    Delivered { message_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Seen { seen_by: Identity },
    Typing { from: Identity },
    StopTyping { from: Identity },
    Notification { from: Identity, text: String, ts: i64 },
    Error { kind: String, message: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_client_frames() {
        let frame = json!({
            "event": "private_message",
            "data": { "from": "alice", "to": "bob", "type": "image", "imageUrl": "http://x" }
        });
        let ClientEvent::PrivateMessage(payload) = serde_json::from_value(frame).unwrap() else {
            panic!("wrong variant");
        };
        let draft = payload.draft();
        assert_eq!(draft.kind, MessageKind::Image);
        assert_eq!(draft.image_url.as_deref(), Some("http://x"));

        let frame = json!({ "event": "typing", "data": { "to": "bob" } });
        assert!(matches!(
            serde_json::from_value(frame).unwrap(),
            ClientEvent::Typing(PeerPayload { from: None, .. })
        ));
    }

    #[test]
    fn kind_defaults_to_text() {
        let frame = json!({ "event": "private_message", "data": { "to": "bob", "text": "hi" } });
        let ClientEvent::PrivateMessage(payload) = serde_json::from_value(frame).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(payload.draft().kind, MessageKind::Text);
    }

    #[test]
    fn server_frames_keep_client_field_names() {
        let seen = ServerEvent::Seen { seen_by: Identity::parse("bob").unwrap() };
        assert_eq!(
            serde_json::to_value(&seen).unwrap(),
            json!({ "event": "seen", "data": { "seenBy": "bob" } })
        );

        let delivered = ServerEvent::Delivered { message_id: Uuid::nil() };
        assert_eq!(
            serde_json::to_value(&delivered).unwrap(),
            json!({ "event": "delivered", "data": { "messageId": Uuid::nil() } })
        );

        let online = ServerEvent::OnlineUsers(vec![Identity::parse("alice").unwrap()]);
        assert_eq!(
            serde_json::to_value(&online).unwrap(),
            json!({ "event": "online_users", "data": ["alice"] })
        );
    }
}
