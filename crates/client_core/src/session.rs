//! Authenticated session value, its persistence adapter, and the login flow.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{UserId, UserSummary},
    protocol::{AuthResponse, LoginRequest, SignupRequest},
};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{error::ChatError, rest::AuthApi};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

/// The logged-in user together with the bearer tokens issued for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: UserSummary,
    pub tokens: AuthTokens,
}

impl Session {
    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn access_token(&self) -> &str {
        &self.tokens.access
    }
}

impl From<AuthResponse> for Session {
    fn from(value: AuthResponse) -> Self {
        Self {
            user: value.user,
            tokens: AuthTokens {
                access: value.access,
                refresh: value.refresh,
            },
        }
    }
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<Session>>,
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<Session>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        *self.inner.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().await.take();
        Ok(())
    }
}

/// Keeps the session as a JSON document on disk.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<Session>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read session file '{}'", self.path.display())
                })
            }
        };
        let session = serde_json::from_slice(&raw).with_context(|| {
            format!("session file '{}' is not valid JSON", self.path.display())
        })?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!(
                    "failed to create parent directory '{}' for session file",
                    parent.display()
                )
            })?;
        }
        let encoded = serde_json::to_vec_pretty(session)?;
        let staging = self.path.with_extension("json.tmp");
        tokio::fs::write(&staging, encoded)
            .await
            .with_context(|| format!("failed to write '{}'", staging.display()))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .with_context(|| format!("failed to replace '{}'", self.path.display()))?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove '{}'", self.path.display())),
        }
    }
}

pub struct SessionManager {
    auth: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
}

impl SessionManager {
    pub fn new(auth: Arc<dyn AuthApi>, store: Arc<dyn TokenStore>) -> Self {
        Self { auth, store }
    }

    /// Returns the persisted session, if any. Storage failures are logged and
    /// treated as logged out.
    pub async fn restore(&self) -> Option<Session> {
        match self.store.load().await {
            Ok(session) => session,
            Err(err) => {
                error!("failed to restore stored session: {err:#}");
                None
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ChatError> {
        let response = self
            .auth
            .login(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await
            .map_err(|err| {
                warn!(username, "login rejected: {err}");
                ChatError::Auth("invalid credentials".into())
            })?;
        self.persist(response.into()).await
    }

    pub async fn signup(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, ChatError> {
        let response = self
            .auth
            .signup(&SignupRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            })
            .await
            .map_err(|err| {
                warn!(username, "signup rejected: {err}");
                ChatError::Auth(
                    err.server_message()
                        .map(str::to_string)
                        .unwrap_or_else(|| "signup failed".to_string()),
                )
            })?;
        self.persist(response.into()).await
    }

    pub async fn logout(&self) -> Result<(), ChatError> {
        self.store
            .clear()
            .await
            .map_err(|source| ChatError::TokenStore { source })?;
        info!("session cleared");
        Ok(())
    }

    async fn persist(&self, session: Session) -> Result<Session, ChatError> {
        self.store
            .save(&session)
            .await
            .map_err(|source| ChatError::TokenStore { source })?;
        info!(
            user_id = session.user.id.0,
            username = %session.user.username,
            "session established"
        );
        Ok(session)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
