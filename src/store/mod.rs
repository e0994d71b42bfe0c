mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{error::RelayError, rooms::{Identity, RoomId}};

pub use sqlite::SqliteMessageStore;

pub const IMAGE_PREVIEW: &str = "📷 Sent an image";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
        }
    }

    fn from_stored(raw: &str) -> Result<MessageKind, StoreError> {
        match raw {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            other => Err(StoreError::Corrupt(format!("unknown message kind {other:?}"))),
        }
    }
}

/// Content as submitted by a client, before validation.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub kind: MessageKind,
    pub text: Option<String>,
    pub image_url: Option<String>,
}

impl Draft {
    pub fn text(body: impl Into<String>) -> Draft {
        Draft {
            kind: MessageKind::Text,
            text: Some(body.into()),
            image_url: None,
        }
    }

    pub fn image(url: impl Into<String>, caption: Option<String>) -> Draft {
        Draft {
            kind: MessageKind::Image,
            text: caption,
            image_url: Some(url.into()),
        }
    }

    /// Validates the content and binds it to a room and sender.
    pub fn into_new_message(
        self,
        room: RoomId,
        sender: Identity,
    ) -> Result<NewMessage, RelayError> {
        let image_url = self.image_url.filter(|url| !url.trim().is_empty());
        match self.kind {
            MessageKind::Text => {
                let text = self
                    .text
                    .filter(|text| !text.trim().is_empty())
                    .ok_or(RelayError::InvalidMessage("text message is empty"))?;
                Ok(NewMessage { room, sender, kind: MessageKind::Text, text, image_url: None })
            }
            MessageKind::Image => {
                let image_url =
                    image_url.ok_or(RelayError::InvalidMessage("image message has no image url"))?;
                Ok(NewMessage {
                    room,
                    sender,
                    kind: MessageKind::Image,
                    text: self.text.unwrap_or_default(),
                    image_url: Some(image_url),
                })
            }
        }
    }
}

/// Validated message waiting to be appended.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: RoomId,
    pub sender: Identity,
    pub kind: MessageKind,
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    /// Store-assigned position, also the pagination cursor.
    pub seq: i64,
    pub room: RoomId,
    #[serde(rename = "username")]
    pub sender: Identity,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Unix milliseconds.
    pub ts: i64,
    pub delivered_to: BTreeSet<Identity>,
    pub seen_by: BTreeSet<Identity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Seen,
}

impl Message {
    /// Tick state from the sender's point of view. Seen wins even when no
    /// delivery was recorded.
    pub fn status_for(&self, recipient: &Identity) -> DeliveryStatus {
        if self.seen_by.contains(recipient) {
            DeliveryStatus::Seen
        } else if self.delivered_to.contains(recipient) {
            DeliveryStatus::Delivered
        } else {
            DeliveryStatus::Sent
        }
    }

    /// Short text for out-of-room notifications.
    pub fn preview(&self) -> &str {
        match self.kind {
            MessageKind::Image => IMAGE_PREVIEW,
            MessageKind::Text => &self.text,
        }
    }
}

/// Append-only message log keyed by room.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, message: NewMessage) -> Result<Message, StoreError>;

    /// Newest `limit` messages of the room, oldest first.
    async fn history(&self, room: &RoomId, limit: i64) -> Result<Vec<Message>, StoreError>;

    /// Up to `limit` messages strictly older than `before_seq`, oldest first.
    async fn history_before(
        &self,
        room: &RoomId,
        before_seq: i64,
        limit: i64,
    ) -> Result<Vec<Message>, StoreError>;

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        recipient: &Identity,
    ) -> Result<(), StoreError>;

    /// Adds `viewer` to seen-by of every message in the room. Returns how many
    /// messages were newly marked.
    async fn mark_seen_bulk(&self, room: &RoomId, viewer: &Identity) -> Result<u64, StoreError>;
}
