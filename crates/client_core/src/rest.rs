//! Typed access to the chat REST API.

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ConversationId, UserId, UserSummary},
    error::ApiError,
    protocol::{
        AuthResponse, ConversationSummary, CreateConversationRequest, LoginRequest,
        MessagePayload, SignupRequest,
    },
};
use tracing::{debug, warn};

use crate::{error::RestError, session::Session};

/// Unauthenticated endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthResponse, RestError>;
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, RestError>;
}

#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_users(&self) -> Result<Vec<UserSummary>, RestError>;
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, RestError>;
    async fn create_conversation(
        &self,
        participant_id: UserId,
    ) -> Result<ConversationSummary, RestError>;
    /// Messages of one conversation, oldest first.
    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>, RestError>;
    async fn send_media_message(&self, upload: MediaUpload) -> Result<MessagePayload, RestError>;
}

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub conversation_id: ConversationId,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub struct HttpChatApi {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: None,
        }
    }

    /// Client that attaches the session's bearer token to every request.
    pub fn with_session(base_url: impl Into<String>, session: &Session) -> Self {
        let mut api = Self::new(base_url);
        api.access_token = Some(session.access_token().to_string());
        api
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RestError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let status = status.as_u16();
            debug!(status, "chat api returned an error response");
            return Err(RestError::Status {
                status,
                error: ApiError::from_response(status, &body),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl AuthApi for HttpChatApi {
    async fn signup(&self, request: &SignupRequest) -> Result<AuthResponse, RestError> {
        let response = self
            .http
            .post(self.endpoint("chat/signup/"))
            .json(request)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, RestError> {
        let response = self
            .http
            .post(self.endpoint("chat/login/"))
            .json(request)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_users(&self) -> Result<Vec<UserSummary>, RestError> {
        let response = self
            .authorize(self.http.get(self.endpoint("chat/users/")))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, RestError> {
        let response = self
            .authorize(self.http.get(self.endpoint("chat/conversations/")))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn create_conversation(
        &self,
        participant_id: UserId,
    ) -> Result<ConversationSummary, RestError> {
        let response = self
            .authorize(self.http.post(self.endpoint("chat/conversations/")))
            .json(&CreateConversationRequest { participant_id })
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn list_messages(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MessagePayload>, RestError> {
        let response = self
            .authorize(self.http.get(self.endpoint("chat/messages/")))
            .query(&[("conversation_id", conversation_id.0)])
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = Self::read_json(response).await?;
        let total = rows.len();
        let payloads: Vec<MessagePayload> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| {
                serde_json::from_value(row)
                    .map_err(|err| {
                        warn!(
                            conversation_id = conversation_id.0,
                            index, "skipping unreadable history row: {err}"
                        )
                    })
                    .ok()
            })
            .collect();
        debug!(
            conversation_id = conversation_id.0,
            total,
            decoded = payloads.len(),
            "history rows decoded"
        );
        Ok(payloads)
    }

    async fn send_media_message(&self, upload: MediaUpload) -> Result<MessagePayload, RestError> {
        let media = Part::bytes(upload.bytes)
            .file_name(upload.filename)
            .mime_str(&upload.mime_type)?;
        let form = Form::new()
            .text("conversation", upload.conversation_id.0.to_string())
            .part("media", media);
        let response = self
            .authorize(self.http.post(self.endpoint("chat/messages/")))
            .multipart(form)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[cfg(test)]
#[path = "tests/rest_tests.rs"]
mod tests;
