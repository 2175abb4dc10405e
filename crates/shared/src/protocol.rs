use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{
    domain::{ConversationId, MessageId, UserId, UserSummary},
    error::FrameError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub user: UserSummary,
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub participant_id: UserId,
}

/// Abbreviated last message attached to a conversation listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
}

impl ConversationSummary {
    /// The other party of a two-person conversation.
    pub fn counterpart(&self, local_user: UserId) -> Option<&UserSummary> {
        self.participants
            .iter()
            .find(|participant| participant.id != local_user)
            .or_else(|| self.participants.first())
    }

    pub fn preview(&self) -> &str {
        match &self.last_message {
            Some(MessagePreview {
                text: Some(text), ..
            }) if !text.trim().is_empty() => text,
            Some(MessagePreview { media: Some(_), .. }) => "[image]",
            _ => "No messages yet",
        }
    }
}

/// A message as returned by the history endpoint and the media upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationId>,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Client to server frame on the live transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub message: String,
    pub sender_id: UserId,
    pub conversation_id: ConversationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageFrame {
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(
        default,
        alias = "media_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub media: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

const NAIVE_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// RFC 3339, or ISO-8601 without an offset, which is read as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw:?}")))
}

/// Server to client frame on the live transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    Message(MessageFrame),
    Error(ErrorFrame),
}

impl InboundFrame {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        if !value.is_object() {
            return Err(FrameError::UnknownShape(format!(
                "expected a JSON object, got {value}"
            )));
        }
        let frame = serde_json::from_value::<InboundFrame>(value)
            .map_err(|err| FrameError::UnknownShape(err.to_string()))?;
        if let InboundFrame::Message(message) = &frame {
            let has_text = message
                .message
                .as_deref()
                .is_some_and(|text| !text.is_empty());
            let has_media = message.media.as_deref().is_some_and(|url| !url.is_empty());
            if !has_text && !has_media {
                return Err(FrameError::EmptyBody);
            }
        }
        Ok(frame)
    }
}
