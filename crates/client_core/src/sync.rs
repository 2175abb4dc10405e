//! Per-thread message synchronization.
//!
//! A [`SyncEngine`] owns the newest-first display list of one conversation. It
//! merges a single history snapshot fetched over REST with the frames arriving
//! on the live transport, and echoes the local user's sends immediately with a
//! temporary id. Inbound frames authored by the local user are dropped since
//! they are already shown through that echo.

use std::{
    collections::HashSet,
    sync::{Arc, Weak},
    time::Duration,
};

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{ConversationId, MessageId, UserId},
    protocol::{InboundFrame, MessagePayload, OutboundFrame},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::{ChatError, TransportError},
    message::{ChatMessage, MediaAsset, MessageKey, TempIdGenerator, MAX_MEDIA_BYTES},
    reconnect::{ConnectionState, ReconnectPolicy},
    rest::{ChatApi, MediaUpload},
    session::Session,
    transport::{TransportConnector, TransportLink},
};

const LINK_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum SyncEvent {
    HistoryLoaded {
        conversation_id: ConversationId,
        count: usize,
    },
    MessageReceived(ChatMessage),
    MessageSent(ChatMessage),
    ConnectionChanged(ConnectionState),
    Error(String),
}

/// What processing one inbound frame did to the display list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Inserted,
    SuppressedOwnEcho,
    ServerError,
    Malformed,
    /// The frame belongs to a link that has since been closed or replaced.
    Stale,
}

struct ActiveLink {
    id: u64,
    conversation_id: ConversationId,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl ActiveLink {
    /// Closing the outbound queue asks the link task to close the sink and exit.
    async fn shutdown(self) {
        let Self {
            id,
            outbound,
            mut task,
            ..
        } = self;
        drop(outbound);
        if tokio::time::timeout(LINK_SHUTDOWN_GRACE, &mut task)
            .await
            .is_err()
        {
            debug!(link_id = id, "live transport did not close in time; aborting");
            task.abort();
        }
    }
}

struct SyncState {
    conversation_id: Option<ConversationId>,
    display_list: Vec<ChatMessage>,
    link: Option<ActiveLink>,
    connection: ConnectionState,
    /// Bumped on teardown and conversation switch; stale history responses compare against it.
    epoch: u64,
    /// Count of entries ever prepended by live frames or local sends.
    arrivals: u64,
    next_link_id: u64,
    temp_ids: TempIdGenerator,
}

pub struct SyncEngine {
    session: Session,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn TransportConnector>,
    reconnect: ReconnectPolicy,
    inner: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
    pub fn new(
        session: Session,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn TransportConnector>,
    ) -> Arc<Self> {
        Self::with_reconnect(session, api, connector, ReconnectPolicy::Disabled)
    }

    pub fn with_reconnect(
        session: Session,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn TransportConnector>,
        reconnect: ReconnectPolicy,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            session,
            api,
            connector,
            reconnect,
            inner: Mutex::new(SyncState {
                conversation_id: None,
                display_list: Vec::new(),
                link: None,
                connection: ConnectionState::Disconnected,
                epoch: 0,
                arrivals: 0,
                next_link_id: 0,
                temp_ids: TempIdGenerator::default(),
            }),
            events,
        })
    }

    pub fn local_user_id(&self) -> UserId {
        self.session.user_id()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the display list, newest first.
    pub async fn display_list(&self) -> Vec<ChatMessage> {
        self.inner.lock().await.display_list.clone()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.inner.lock().await.connection
    }

    pub async fn conversation_id(&self) -> Option<ConversationId> {
        self.inner.lock().await.conversation_id
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.lock().await.link.is_some()
    }

    /// Fetches the conversation history and makes it the display list.
    ///
    /// Entries that arrived live while the fetch was in flight are kept on
    /// top unless the snapshot already contains them. On failure the current
    /// list is left untouched. A response that lands after `disconnect` or a
    /// conversation switch is returned but not applied.
    pub async fn load_history(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let (stale_link, epoch, arrivals_before) = {
            let mut state = self.inner.lock().await;
            let stale_link = self.bind(&mut state, conversation_id);
            (stale_link, state.epoch, state.arrivals)
        };
        if let Some(link) = stale_link {
            link.shutdown().await;
        }

        let payloads = match self.api.list_messages(conversation_id).await {
            Ok(payloads) => payloads,
            Err(err) => {
                warn!(
                    conversation_id = conversation_id.0,
                    "failed to load message history: {err}"
                );
                let _ = self
                    .events
                    .send(SyncEvent::Error(format!("failed to load messages: {err}")));
                return Err(ChatError::HistoryFetch(err));
            }
        };

        let mut history = history_to_messages(payloads);
        history.reverse();

        let mut state = self.inner.lock().await;
        if state.epoch != epoch || state.conversation_id != Some(conversation_id) {
            debug!(
                conversation_id = conversation_id.0,
                "discarding history response for a closed thread"
            );
            return Ok(history);
        }

        let known: HashSet<MessageId> = history
            .iter()
            .filter_map(|message| message.key.server_id())
            .collect();
        let arrived_during_fetch = usize::try_from(state.arrivals.saturating_sub(arrivals_before))
            .unwrap_or(usize::MAX)
            .min(state.display_list.len());
        let mut merged: Vec<ChatMessage> = state
            .display_list
            .drain(..arrived_during_fetch)
            .filter(|message| {
                message
                    .key
                    .server_id()
                    .map_or(true, |id| !known.contains(&id))
            })
            .collect();
        merged.extend(history.iter().cloned());
        state.display_list = merged;

        info!(
            conversation_id = conversation_id.0,
            count = history.len(),
            "message history loaded"
        );
        let _ = self.events.send(SyncEvent::HistoryLoaded {
            conversation_id,
            count: history.len(),
        });
        Ok(history)
    }

    /// Loads history and opens the live transport at the same time.
    ///
    /// A failed history fetch is reported through the event stream and
    /// yields `None`; the thread stays usable for live messages. Only a
    /// failure to connect is returned as an error.
    pub async fn open(
        self: &Arc<Self>,
        conversation_id: ConversationId,
    ) -> Result<Option<Vec<ChatMessage>>, ChatError> {
        let (history, connected) = tokio::join!(
            self.load_history(conversation_id),
            self.connect(conversation_id)
        );
        connected?;
        Ok(history.ok())
    }

    /// Opens the live transport for `conversation_id`, replacing any open one.
    pub async fn connect(self: &Arc<Self>, conversation_id: ConversationId) -> Result<(), ChatError> {
        let (replaced, epoch) = {
            let mut state = self.inner.lock().await;
            let mut replaced: Vec<ActiveLink> = Vec::new();
            replaced.extend(self.bind(&mut state, conversation_id));
            replaced.extend(state.link.take());
            self.set_connection(&mut state, ConnectionState::Connecting);
            (replaced, state.epoch)
        };
        for link in replaced {
            info!(
                conversation_id = link.conversation_id.0,
                "closing previous live transport"
            );
            link.shutdown().await;
        }

        let transport = match self.connector.open(conversation_id).await {
            Ok(transport) => transport,
            Err(err) => {
                warn!(
                    conversation_id = conversation_id.0,
                    "failed to open live transport: {err}"
                );
                {
                    let mut state = self.inner.lock().await;
                    if state.epoch == epoch && state.link.is_none() {
                        self.set_connection(&mut state, ConnectionState::Disconnected);
                    }
                }
                let _ = self
                    .events
                    .send(SyncEvent::Error(format!("failed to connect: {err}")));
                return Err(err.into());
            }
        };

        let raced = {
            let mut state = self.inner.lock().await;
            if state.epoch != epoch || state.conversation_id != Some(conversation_id) {
                drop(state);
                debug!(
                    conversation_id = conversation_id.0,
                    "thread closed while connecting; dropping new transport"
                );
                let mut sink = transport.sink;
                let _ = sink.close().await;
                return Err(TransportError::Closed.into());
            }

            let raced = state.link.take();
            state.next_link_id += 1;
            let link_id = state.next_link_id;
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let task = tokio::spawn(run_link(
                Arc::downgrade(self),
                link_id,
                conversation_id,
                transport,
                outbound_rx,
                Arc::clone(&self.connector),
                self.reconnect,
            ));
            state.link = Some(ActiveLink {
                id: link_id,
                conversation_id,
                outbound: outbound_tx,
                task,
            });
            self.set_connection(&mut state, ConnectionState::Connected);
            raced
        };
        if let Some(link) = raced {
            link.shutdown().await;
        }

        info!(
            conversation_id = conversation_id.0,
            user_id = self.local_user_id().0,
            "live transport connected"
        );
        Ok(())
    }

    /// Sends `text` over the live transport and shows it right away.
    ///
    /// Returns the optimistic entry, or `None` when nothing was sent because
    /// the text is blank or no transport is open for `conversation_id`.
    /// Delivery is not confirmed; a failed transmit only gets logged.
    pub async fn send(&self, conversation_id: ConversationId, text: &str) -> Option<ChatMessage> {
        if text.trim().is_empty() {
            return None;
        }

        let mut state = self.inner.lock().await;
        let Some(link) = state.link.as_ref() else {
            debug!(
                conversation_id = conversation_id.0,
                "send ignored without a live transport"
            );
            return None;
        };
        if link.conversation_id != conversation_id {
            warn!(
                conversation_id = conversation_id.0,
                connected_to = link.conversation_id.0,
                "send ignored for a conversation that is not connected"
            );
            return None;
        }

        let frame = OutboundFrame {
            message: text.to_string(),
            sender_id: self.local_user_id(),
            conversation_id,
        };
        match serde_json::to_string(&frame) {
            Ok(encoded) => {
                if link.outbound.send(encoded).is_err() {
                    warn!(
                        conversation_id = conversation_id.0,
                        "live transport already closed; message will not be delivered"
                    );
                }
            }
            Err(err) => warn!("failed to encode outbound frame: {err}"),
        }

        let now = Utc::now();
        let key = MessageKey::Pending(state.temp_ids.next(now));
        let message = ChatMessage::new(
            key,
            Some(text.to_string()),
            None,
            now,
            self.local_user_id(),
            Some(self.session.user.username.clone()),
        )
        .ok()?;
        state.display_list.insert(0, message.clone());
        state.arrivals += 1;
        drop(state);

        let _ = self.events.send(SyncEvent::MessageSent(message.clone()));
        Some(message)
    }

    /// Uploads an image through the REST API and reloads the history.
    pub async fn send_media(
        &self,
        conversation_id: ConversationId,
        asset: MediaAsset,
    ) -> Result<MessagePayload, ChatError> {
        let size = asset.size_bytes();
        if size > MAX_MEDIA_BYTES {
            warn!(
                conversation_id = conversation_id.0,
                size, "media exceeds upload limit"
            );
            return Err(ChatError::MediaTooLarge {
                size,
                limit: MAX_MEDIA_BYTES,
            });
        }

        let upload = MediaUpload {
            conversation_id,
            filename: asset.filename_or_default(),
            mime_type: asset.mime_type_or_default(),
            bytes: asset.bytes,
        };
        let created = self.api.send_media_message(upload).await.map_err(|err| {
            warn!(
                conversation_id = conversation_id.0,
                "media upload failed: {err}"
            );
            ChatError::MediaUpload(err)
        })?;

        if let Err(err) = self.load_history(conversation_id).await {
            let _ = self.events.send(SyncEvent::Error(format!(
                "media sent but refresh failed: {err}"
            )));
        }
        Ok(created)
    }

    /// Closes the live transport. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let link = {
            let mut state = self.inner.lock().await;
            state.epoch += 1;
            let link = state.link.take();
            self.set_connection(&mut state, ConnectionState::Disconnected);
            link
        };
        if let Some(link) = link {
            info!(
                conversation_id = link.conversation_id.0,
                "closing live transport"
            );
            link.shutdown().await;
        }
    }

    /// Applies one raw frame as if it arrived on the current link.
    pub async fn handle_frame(&self, raw: &str) -> FrameOutcome {
        let link_id = self.inner.lock().await.link.as_ref().map(|link| link.id);
        match link_id {
            Some(link_id) => self.apply_frame(link_id, raw).await,
            None => FrameOutcome::Stale,
        }
    }

    async fn apply_frame(&self, link_id: u64, raw: &str) -> FrameOutcome {
        let frame = match InboundFrame::parse(raw) {
            Ok(InboundFrame::Message(frame)) => frame,
            Ok(InboundFrame::Error(frame)) => {
                warn!(link_id, error = %frame.error, "server reported an error on the live transport");
                return FrameOutcome::ServerError;
            }
            Err(err) => {
                warn!(link_id, "dropping malformed live frame: {err}");
                return FrameOutcome::Malformed;
            }
        };

        let mut state = self.inner.lock().await;
        if state.link.as_ref().map(|link| link.id) != Some(link_id) {
            return FrameOutcome::Stale;
        }
        if frame.sender_id == self.local_user_id() {
            debug!(message_id = %frame.id, "suppressing echo of own message");
            return FrameOutcome::SuppressedOwnEcho;
        }
        let message = match ChatMessage::from_frame(frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(link_id, "dropping malformed live frame: {err}");
                return FrameOutcome::Malformed;
            }
        };
        state.display_list.insert(0, message.clone());
        state.arrivals += 1;
        drop(state);

        let _ = self.events.send(SyncEvent::MessageReceived(message));
        FrameOutcome::Inserted
    }

    /// Points the engine at `conversation_id`. Switching away from another
    /// conversation clears the list and hands back the old link for shutdown.
    fn bind(&self, state: &mut SyncState, conversation_id: ConversationId) -> Option<ActiveLink> {
        match state.conversation_id {
            Some(current) if current == conversation_id => None,
            previous => {
                if let Some(previous) = previous {
                    info!(
                        from = previous.0,
                        to = conversation_id.0,
                        "switching conversation"
                    );
                    state.display_list.clear();
                    state.epoch += 1;
                }
                state.conversation_id = Some(conversation_id);
                let link = state.link.take();
                if link.is_some() {
                    self.set_connection(state, ConnectionState::Disconnected);
                }
                link
            }
        }
    }

    fn set_connection(&self, state: &mut SyncState, connection: ConnectionState) {
        if state.connection != connection {
            state.connection = connection;
            let _ = self.events.send(SyncEvent::ConnectionChanged(connection));
        }
    }

    async fn set_link_connection(&self, link_id: u64, connection: ConnectionState) {
        let mut state = self.inner.lock().await;
        if state.link.as_ref().map(|link| link.id) == Some(link_id) {
            self.set_connection(&mut state, connection);
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(link) = self.inner.get_mut().link.take() {
            link.task.abort();
        }
    }
}

fn history_to_messages(payloads: Vec<MessagePayload>) -> Vec<ChatMessage> {
    payloads
        .into_iter()
        .filter_map(|payload| {
            let id = payload.id.clone();
            ChatMessage::from_payload(payload)
                .map_err(|err| warn!(message_id = %id, "skipping history entry: {err}"))
                .ok()
        })
        .collect()
}

/// Drives one link: forwards queued sends, applies inbound frames, and
/// reopens the transport per the reconnect policy when the peer goes away.
async fn run_link(
    engine: Weak<SyncEngine>,
    link_id: u64,
    conversation_id: ConversationId,
    transport: TransportLink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    connector: Arc<dyn TransportConnector>,
    policy: ReconnectPolicy,
) {
    let mut transport = transport;
    loop {
        let TransportLink {
            mut sink,
            mut stream,
        } = transport;

        loop {
            tokio::select! {
                inbound = stream.next() => match inbound {
                    Some(Ok(raw)) => {
                        let Some(current) = engine.upgrade() else {
                            return;
                        };
                        current.apply_frame(link_id, &raw).await;
                    }
                    Some(Err(err)) => {
                        warn!(conversation_id = conversation_id.0, "live transport failed: {err}");
                        break;
                    }
                    None => {
                        info!(conversation_id = conversation_id.0, "live transport closed by peer");
                        break;
                    }
                },
                queued = outbound.recv() => match queued {
                    Some(text) => {
                        if let Err(err) = sink.send(text).await {
                            warn!(conversation_id = conversation_id.0, "failed to transmit frame: {err}");
                        }
                    }
                    None => {
                        if let Err(err) = sink.close().await {
                            debug!(conversation_id = conversation_id.0, "error while closing live transport: {err}");
                        }
                        return;
                    }
                },
            }
        }
        drop(sink);

        let mut attempt = 0;
        transport = loop {
            attempt += 1;
            let Some(delay) = policy.delay_for(attempt) else {
                if let Some(engine) = engine.upgrade() {
                    engine
                        .set_link_connection(link_id, ConnectionState::Disconnected)
                        .await;
                    if attempt > 1 {
                        let _ = engine.events.send(SyncEvent::Error(format!(
                            "gave up reconnecting after {} attempts",
                            attempt - 1
                        )));
                    }
                }
                return;
            };

            let Some(current) = engine.upgrade() else {
                return;
            };
            current
                .set_link_connection(link_id, ConnectionState::Backoff { attempt, delay })
                .await;
            drop(current);

            let sleep = tokio::time::sleep(delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    queued = outbound.recv() => match queued {
                        Some(_) => warn!(conversation_id = conversation_id.0, "dropping message sent while reconnecting"),
                        None => return,
                    },
                }
            }

            let Some(current) = engine.upgrade() else {
                return;
            };
            current
                .set_link_connection(link_id, ConnectionState::Connecting)
                .await;
            drop(current);

            match connector.open(conversation_id).await {
                Ok(reopened) => {
                    info!(conversation_id = conversation_id.0, attempt, "live transport reconnected");
                    if let Some(engine) = engine.upgrade() {
                        engine
                            .set_link_connection(link_id, ConnectionState::Connected)
                            .await;
                    }
                    break reopened;
                }
                Err(err) => {
                    warn!(conversation_id = conversation_id.0, attempt, "reconnect failed: {err}");
                }
            }
        };
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
