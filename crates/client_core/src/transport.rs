//! Live transport seam: a text-frame sink/stream pair per conversation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use shared::domain::ConversationId;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use crate::error::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One opened connection. The stream ends when the peer closes.
pub struct TransportLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn open(&self, conversation_id: ConversationId) -> Result<TransportLink, TransportError>;
}

/// Opens `<base>/ws/chat/<conversation_id>/` over WebSocket.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn conversation_url(&self, conversation_id: ConversationId) -> Result<Url, TransportError> {
        let raw = format!("{}/ws/chat/{}/", self.base_url, conversation_id.0);
        let url = Url::parse(&raw).map_err(|err| TransportError::InvalidUrl {
            url: raw.clone(),
            reason: err.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl {
                url: raw,
                reason: "scheme must be ws:// or wss://".into(),
            });
        }
        Ok(url)
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn open(&self, conversation_id: ConversationId) -> Result<TransportLink, TransportError> {
        let url = self.conversation_url(conversation_id)?;
        debug!(conversation_id = conversation_id.0, %url, "opening websocket");
        let (socket, _) = connect_async(url.as_str()).await?;
        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text))));
        let stream = read
            .take_while(|frame| future::ready(!matches!(frame, Ok(Message::Close(_)))))
            .filter_map(|frame| {
                future::ready(match frame {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(err) => Some(Err(TransportError::from(err))),
                })
            });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_conversation_path() {
        let connector = WsConnector::new("ws://127.0.0.1:8000/");
        let url = connector
            .conversation_url(ConversationId(12))
            .expect("url");
        assert_eq!(url.as_str(), "ws://127.0.0.1:8000/ws/chat/12/");
    }

    #[test]
    fn rejects_http_scheme() {
        let connector = WsConnector::new("http://127.0.0.1:8000");
        let err = connector
            .conversation_url(ConversationId(1))
            .expect_err("must fail");
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }
}
