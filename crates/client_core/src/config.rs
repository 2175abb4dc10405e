use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::reconnect::ReconnectPolicy;

pub const SETTINGS_FILE: &str = "chat_client.toml";

const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub ws_base_url: Option<String>,
    pub token_path: PathBuf,
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".into(),
            ws_base_url: None,
            token_path: PathBuf::from("./data/session.json"),
            reconnect: ReconnectPolicy::Disabled,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    ws_base_url: Option<String>,
    token_path: Option<PathBuf>,
    reconnect_base_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

impl ClientSettings {
    /// Root of the live transport, e.g. `ws://host:8000`.
    ///
    /// Derived from the REST base when not configured: the scheme becomes
    /// `ws`/`wss` and the path is dropped, since the socket routes live at
    /// the host root rather than under the API prefix.
    pub fn ws_base_url(&self) -> Result<String> {
        if let Some(explicit) = &self.ws_base_url {
            return Ok(explicit.trim_end_matches('/').to_string());
        }

        let mut url = Url::parse(&self.api_base_url)
            .with_context(|| format!("invalid api base url: {}", self.api_base_url))?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            _ => return Err(anyhow!("api_base_url must start with http:// or https://")),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("failed to derive websocket scheme from {}", self.api_base_url))?;
        url.set_path("");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.as_str().trim_end_matches('/').to_string())
    }
}

pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Err(err) = apply_file(&mut settings, &raw) {
            warn!(path = %path.display(), "ignoring unreadable settings file: {err:#}");
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut ClientSettings, raw: &str) -> Result<()> {
    let file_cfg: FileSettings = toml::from_str(raw).context("invalid settings toml")?;

    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.ws_base_url {
        settings.ws_base_url = Some(v);
    }
    if let Some(v) = file_cfg.token_path {
        settings.token_path = v;
    }
    if let Some(base_ms) = file_cfg.reconnect_base_ms {
        settings.reconnect = ReconnectPolicy::backoff(
            Duration::from_millis(base_ms),
            Duration::from_millis(file_cfg.reconnect_max_ms.unwrap_or(DEFAULT_RECONNECT_MAX_MS)),
            file_cfg
                .reconnect_max_attempts
                .unwrap_or(DEFAULT_RECONNECT_ATTEMPTS),
        );
    }
    Ok(())
}

fn apply_env(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_API_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = lookup("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = lookup("CHAT_WS_URL") {
        settings.ws_base_url = Some(v);
    }
    if let Some(v) = lookup("APP__WS_BASE_URL") {
        settings.ws_base_url = Some(v);
    }

    if let Some(v) = lookup("CHAT_TOKEN_PATH") {
        settings.token_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("APP__TOKEN_PATH") {
        settings.token_path = PathBuf::from(v);
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
