use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize};

/// Server ids arrive either as JSON integers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

fn deserialize_wire_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match WireId::deserialize(deserializer)? {
        WireId::Number(value) => Ok(value),
        WireId::Text(raw) => raw
            .trim()
            .parse::<i64>()
            .map_err(|_| de::Error::custom(format!("invalid numeric id: {raw:?}"))),
    }
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub struct $name(pub i64);

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                deserialize_wire_id(deserializer).map($name)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);

/// Message ids are integers on most deployments but may be opaque strings.
/// Numeric strings are read as integers so `"5"` and `5` name the same message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum MessageId {
    Int(i64),
    Text(String),
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match WireId::deserialize(deserializer)? {
            WireId::Number(value) => Ok(Self::Int(value)),
            WireId::Text(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(de::Error::custom("message id must not be empty"));
                }
                Ok(trimmed
                    .parse::<i64>()
                    .map_or_else(|_| Self::Text(trimmed.to_string()), Self::Int))
            }
        }
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_accept_numbers_and_numeric_strings() {
        let from_number: UserId = serde_json::from_str("42").expect("number");
        let from_text: UserId = serde_json::from_str("\"42\"").expect("string");
        assert_eq!(from_number, UserId(42));
        assert_eq!(from_text, UserId(42));
    }

    #[test]
    fn user_ids_reject_non_numeric_strings() {
        let err = serde_json::from_str::<UserId>("\"bob\"").expect_err("must fail");
        assert!(err.to_string().contains("invalid numeric id"));
    }

    #[test]
    fn message_ids_keep_opaque_strings() {
        let opaque: MessageId = serde_json::from_str("\"b7f3c2e0-msg\"").expect("opaque");
        assert_eq!(opaque, MessageId::Text("b7f3c2e0-msg".into()));
        assert_eq!(opaque.to_string(), "b7f3c2e0-msg");
        assert_eq!(serde_json::to_string(&opaque).expect("encode"), "\"b7f3c2e0-msg\"");
    }

    #[test]
    fn numeric_message_ids_compare_equal_across_encodings() {
        let from_number: MessageId = serde_json::from_str("42").expect("number");
        let from_text: MessageId = serde_json::from_str("\" 42 \"").expect("string");
        assert_eq!(from_number, from_text);
        assert_eq!(from_number, MessageId::from(42));
        assert!(serde_json::from_str::<MessageId>("\"\"").is_err());
        assert!(serde_json::from_str::<MessageId>("null").is_err());
    }

    #[test]
    fn ids_serialize_as_plain_integers() {
        let encoded = serde_json::to_string(&ConversationId(9)).expect("encode");
        assert_eq!(encoded, "9");
    }
}
