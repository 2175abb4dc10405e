//! In-process fakes for the REST API and the live transport.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{channel::mpsc as fmpsc, SinkExt, StreamExt};
use shared::{
    domain::{ConversationId, MessageId, UserId, UserSummary},
    error::ApiError,
    protocol::{ConversationSummary, MessagePayload},
};
use tokio::sync::{mpsc, Mutex, Notify};

use crate::{
    error::{RestError, TransportError},
    rest::{ChatApi, MediaUpload},
    session::{AuthTokens, Session},
    transport::{TransportConnector, TransportLink},
};

pub fn session(user_id: i64, username: &str) -> Session {
    Session {
        user: UserSummary {
            id: UserId(user_id),
            username: username.to_string(),
            email: None,
        },
        tokens: AuthTokens {
            access: format!("access-{user_id}"),
            refresh: format!("refresh-{user_id}"),
        },
    }
}

pub fn payload(id: i64, text: &str, sender: i64, timestamp: &str) -> MessagePayload {
    MessagePayload {
        id: MessageId::Int(id),
        conversation: Some(ConversationId(1)),
        sender: UserId(sender),
        sender_username: Some(format!("user{sender}")),
        text: Some(text.to_string()),
        media: None,
        timestamp: timestamp.parse().expect("timestamp"),
    }
}

pub fn frame(id: i64, text: &str, sender: i64, username: &str) -> String {
    serde_json::json!({
        "id": id,
        "message": text,
        "timestamp": "2024-05-01T10:00:00Z",
        "sender_id": sender,
        "sender_username": username,
    })
    .to_string()
}

pub fn status_error(status: u16, body: &str) -> RestError {
    RestError::Status {
        status,
        error: ApiError::from_response(status, body),
    }
}

#[derive(Default)]
pub struct FakeChatApi {
    pub history: Mutex<Vec<MessagePayload>>,
    pub history_failure: Mutex<Option<u16>>,
    pub upload_failure: Mutex<Option<u16>>,
    pub uploads: Mutex<Vec<MediaUpload>>,
    pub list_messages_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    /// When set, `list_messages` parks until the gate is notified.
    pub history_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeChatApi {
    pub fn with_history(history: Vec<MessagePayload>) -> Arc<Self> {
        Arc::new(Self {
            history: Mutex::new(history),
            ..Self::default()
        })
    }

    pub async fn gate_history(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.history_gate.lock().await = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_users(&self) -> Result<Vec<UserSummary>, RestError> {
        Ok(vec![
            UserSummary {
                id: UserId(1),
                username: "alice".into(),
                email: None,
            },
            UserSummary {
                id: UserId(2),
                username: "bob".into(),
                email: None,
            },
        ])
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, RestError> {
        Ok(Vec::new())
    }

    async fn create_conversation(
        &self,
        participant_id: UserId,
    ) -> Result<ConversationSummary, RestError> {
        Ok(ConversationSummary {
            id: ConversationId(77),
            participants: vec![UserSummary {
                id: participant_id,
                username: "bob".into(),
                email: None,
            }],
            last_message: None,
        })
    }

    async fn list_messages(
        &self,
        _conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>, RestError> {
        self.list_messages_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.history_gate.lock().await.take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(status) = *self.history_failure.lock().await {
            return Err(status_error(status, r#"{"detail":"history unavailable"}"#));
        }
        Ok(self.history.lock().await.clone())
    }

    async fn send_media_message(&self, upload: MediaUpload) -> Result<MessagePayload, RestError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(status) = *self.upload_failure.lock().await {
            return Err(status_error(status, r#"{"error":"upload rejected"}"#));
        }
        let conversation_id = upload.conversation_id;
        self.uploads.lock().await.push(upload);
        let mut created = payload(900, "", 1, "2024-05-01T11:00:00Z");
        created.conversation = Some(conversation_id);
        created.text = None;
        created.media = Some("http://cdn/uploads/900.jpg".into());
        self.history.lock().await.push(created.clone());
        Ok(created)
    }
}

/// Server side of one in-memory link.
pub struct MemoryPeer {
    pub conversation_id: ConversationId,
    inbound: fmpsc::UnboundedSender<Result<String, TransportError>>,
    outbound: fmpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    pub fn push(&self, raw: impl Into<String>) {
        self.inbound
            .unbounded_send(Ok(raw.into()))
            .expect("link task alive");
    }

    /// Ends the inbound stream as if the server went away.
    pub fn hang_up(self) {
        self.inbound.close_channel();
    }

    /// Next frame the client transmitted; `None` once the client closed the sink.
    pub async fn next_sent(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(2), self.outbound.next())
            .await
            .expect("timed out waiting for client frame")
    }
}

pub struct MemoryConnector {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    pub opens: AtomicUsize,
    pub failures_remaining: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                peers,
                opens: AtomicUsize::new(0),
                failures_remaining: AtomicUsize::new(0),
            }),
            rx,
        )
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn open(&self, conversation_id: ConversationId) -> Result<TransportLink, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Other("connection refused".into()));
        }

        let (inbound_tx, inbound_rx) = fmpsc::unbounded();
        let (outbound_tx, outbound_rx) = fmpsc::unbounded::<String>();
        let _ = self.peers.send(MemoryPeer {
            conversation_id,
            inbound: inbound_tx,
            outbound: outbound_rx,
        });
        Ok(TransportLink {
            sink: Box::pin(
                outbound_tx.sink_map_err(|err| TransportError::Other(err.to_string())),
            ),
            stream: Box::pin(inbound_rx),
        })
    }
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MemoryPeer>) -> MemoryPeer {
    tokio::time::timeout(Duration::from_secs(2), peers.recv())
        .await
        .expect("timed out waiting for transport open")
        .expect("connector alive")
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
