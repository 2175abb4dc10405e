use std::sync::Arc;

use anyhow::Result;
use shared::{
    domain::{UserId, UserSummary},
    protocol::ConversationSummary,
};
use tracing::info;

pub mod config;
pub mod directory;
pub mod error;
pub mod message;
pub mod reconnect;
pub mod rest;
pub mod session;
pub mod sync;
pub mod transport;

pub use config::{load_settings, ClientSettings};
pub use error::{ChatError, RestError, TransportError};
pub use message::{ChatMessage, MediaAsset, MessageKey, TempId, MAX_MEDIA_BYTES};
pub use reconnect::{ConnectionState, ReconnectPolicy};
pub use rest::{AuthApi, ChatApi, HttpChatApi};
pub use session::{FileTokenStore, MemoryTokenStore, Session, SessionManager, TokenStore};
pub use sync::{FrameOutcome, SyncEngine, SyncEvent};
pub use transport::{TransportConnector, WsConnector};

/// Builds a [`SessionManager`] talking to the configured API and persisting
/// to the configured token file.
pub fn session_manager(settings: &ClientSettings) -> SessionManager {
    SessionManager::new(
        Arc::new(HttpChatApi::new(settings.api_base_url.clone())),
        Arc::new(FileTokenStore::new(settings.token_path.clone())),
    )
}

/// Authenticated entry point: list views plus one [`SyncEngine`] per open thread.
pub struct ChatClient {
    session: Session,
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn TransportConnector>,
    reconnect: ReconnectPolicy,
}

impl ChatClient {
    pub fn new(settings: &ClientSettings, session: Session) -> Result<Self> {
        let ws_base_url = settings.ws_base_url()?;
        info!(
            api = %settings.api_base_url,
            ws = %ws_base_url,
            user_id = session.user_id().0,
            "chat client configured"
        );
        Ok(Self::with_dependencies(
            session.clone(),
            Arc::new(HttpChatApi::with_session(
                settings.api_base_url.clone(),
                &session,
            )),
            Arc::new(WsConnector::new(ws_base_url)),
            settings.reconnect,
        ))
    }

    pub fn with_dependencies(
        session: Session,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn TransportConnector>,
        reconnect: ReconnectPolicy,
    ) -> Self {
        Self {
            session,
            api,
            connector,
            reconnect,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserSummary>, ChatError> {
        let users = self.api.list_users().await?;
        Ok(directory::filter_users(&users, query)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        Ok(self.api.list_conversations().await?)
    }

    pub async fn start_conversation(
        &self,
        participant_id: UserId,
    ) -> Result<ConversationSummary, ChatError> {
        let conversation = self.api.create_conversation(participant_id).await?;
        info!(
            conversation_id = conversation.id.0,
            participant_id = participant_id.0,
            "conversation opened"
        );
        Ok(conversation)
    }

    /// A fresh engine for one chat thread; call `disconnect` when leaving it.
    pub fn open_thread(&self) -> Arc<SyncEngine> {
        SyncEngine::with_reconnect(
            self.session.clone(),
            Arc::clone(&self.api),
            Arc::clone(&self.connector),
            self.reconnect,
        )
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
