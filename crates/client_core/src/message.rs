use std::fmt;

use chrono::{DateTime, Utc};
use shared::{
    domain::{MessageId, UserId},
    protocol::{MessageFrame, MessagePayload},
};
use thiserror::Error;

/// Upload ceiling for image attachments.
pub const MAX_MEDIA_BYTES: u64 = 5 * 1024 * 1024;

const DEFAULT_MEDIA_FILENAME: &str = "upload.jpg";
const DEFAULT_MEDIA_MIME_TYPE: &str = "image/jpeg";

/// Client-only id for a message that the server has not confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Server(MessageId),
    Pending(TempId),
}

impl MessageKey {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }

    pub fn server_id(&self) -> Option<MessageId> {
        match self {
            Self::Server(id) => Some(id.clone()),
            Self::Pending(_) => None,
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "{id}"),
            Self::Pending(id) => write!(f, "{id}"),
        }
    }
}

/// Millisecond timestamps, bumped so that two ids handed out within the same
/// millisecond still differ.
#[derive(Debug, Default)]
pub struct TempIdGenerator {
    last: u64,
}

impl TempIdGenerator {
    pub fn next(&mut self, now: DateTime<Utc>) -> TempId {
        let candidate = u64::try_from(now.timestamp_millis()).unwrap_or_default();
        let id = candidate.max(self.last.saturating_add(1));
        self.last = id;
        TempId(id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("message {key} has neither text nor media")]
pub struct EmptyMessage {
    pub key: MessageKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub key: MessageKey,
    pub text: Option<String>,
    pub media_url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
    pub sender_username: Option<String>,
}

impl ChatMessage {
    /// Empty strings count as absent; a message needs at least one of text or media.
    pub fn new(
        key: MessageKey,
        text: Option<String>,
        media_url: Option<String>,
        timestamp: DateTime<Utc>,
        sender_id: UserId,
        sender_username: Option<String>,
    ) -> Result<Self, EmptyMessage> {
        let text = text.filter(|text| !text.is_empty());
        let media_url = media_url.filter(|url| !url.is_empty());
        if text.is_none() && media_url.is_none() {
            return Err(EmptyMessage { key });
        }
        Ok(Self {
            key,
            text,
            media_url,
            timestamp,
            sender_id,
            sender_username,
        })
    }

    pub fn from_payload(payload: MessagePayload) -> Result<Self, EmptyMessage> {
        Self::new(
            MessageKey::Server(payload.id),
            payload.text,
            payload.media,
            payload.timestamp,
            payload.sender,
            payload.sender_username,
        )
    }

    pub fn from_frame(frame: MessageFrame) -> Result<Self, EmptyMessage> {
        Self::new(
            MessageKey::Server(frame.id),
            frame.message,
            frame.media,
            frame.timestamp,
            frame.sender_id,
            frame.sender_username,
        )
    }

    pub fn is_from(&self, user_id: UserId) -> bool {
        self.sender_id == user_id
    }
}

/// An image picked for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub filename: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaAsset {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            filename: None,
            mime_type: None,
            bytes,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn filename_or_default(&self) -> String {
        self.filename
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MEDIA_FILENAME.to_string())
    }

    pub fn mime_type_or_default(&self) -> String {
        self.mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MEDIA_MIME_TYPE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().expect("timestamp")
    }

    #[test]
    fn rejects_message_without_text_or_media() {
        let err = ChatMessage::new(
            MessageKey::Server(MessageId::Int(3)),
            Some(String::new()),
            None,
            at("2024-01-01T00:00:00Z"),
            UserId(1),
            None,
        )
        .expect_err("empty message");
        assert_eq!(err.key, MessageKey::Server(MessageId::Int(3)));
    }

    #[test]
    fn media_only_message_is_valid() {
        let message = ChatMessage::new(
            MessageKey::Server(MessageId::Int(4)),
            None,
            Some("http://cdn/img.jpg".into()),
            at("2024-01-01T00:00:00Z"),
            UserId(1),
            Some("alice".into()),
        )
        .expect("media message");
        assert!(message.text.is_none());
        assert!(message.is_from(UserId(1)));
    }

    #[test]
    fn temp_ids_stay_unique_within_one_millisecond() {
        let mut generator = TempIdGenerator::default();
        let now = at("2024-01-01T00:00:00Z");
        let first = generator.next(now);
        let second = generator.next(now);
        let earlier = generator.next(at("2023-12-31T23:59:59Z"));
        assert!(second > first);
        assert!(earlier > second);
        assert_eq!(first.0, now.timestamp_millis() as u64);
    }

    #[test]
    fn pending_keys_never_equal_server_keys() {
        let pending = MessageKey::Pending(TempId(2));
        let server = MessageKey::Server(MessageId::Int(2));
        assert_ne!(pending, server);
        assert!(pending.is_pending());
        assert_eq!(server.server_id(), Some(MessageId::Int(2)));
        assert_eq!(pending.to_string(), "tmp-2");
    }

    #[test]
    fn media_asset_defaults_match_upload_form() {
        let asset = MediaAsset::new(vec![0; 16]);
        assert_eq!(asset.size_bytes(), 16);
        assert_eq!(asset.filename_or_default(), "upload.jpg");
        assert_eq!(asset.mime_type_or_default(), "image/jpeg");

        let named = MediaAsset::new(Vec::new())
            .with_filename("cat.png")
            .with_mime_type("image/png");
        assert_eq!(named.filename_or_default(), "cat.png");
        assert_eq!(named.mime_type_or_default(), "image/png");
    }
}
