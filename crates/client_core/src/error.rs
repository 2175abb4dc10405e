//! Error types surfaced by the chat client core.

use shared::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request ({status}): {error}")]
    Status { status: u16, error: ApiError },
}

impl RestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http(err) => err.status().map(|status| status.as_u16()),
            Self::Status { status, .. } => Some(*status),
        }
    }

    /// Message reported by the server, when the failure carried one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Http(_) => None,
            Self::Status { error, .. } => Some(error.message.as_str()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("invalid live transport url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("live transport closed")]
    Closed,
    #[error("live transport failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("failed to load message history: {0}")]
    HistoryFetch(#[source] RestError),
    #[error("media is {size} bytes; the limit is {limit} bytes")]
    MediaTooLarge { size: u64, limit: u64 },
    #[error("failed to upload media: {0}")]
    MediaUpload(#[source] RestError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("request failed: {0}")]
    Rest(#[from] RestError),
    #[error("token store failure: {source}")]
    TokenStore { source: anyhow::Error },
}
