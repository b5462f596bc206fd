//! Session configuration parsed from environment variables.

use std::time::Duration;

use crate::error::ChatError;
use crate::lifecycle::{
    DEFAULT_MANUAL_RECONNECT_DELAY_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_MS,
    DEFAULT_RECONNECT_MAX_MS, ReconnectPolicy,
};

pub const DEFAULT_FALLBACK_PATH: &str = "/chat/send";
pub const DEFAULT_HISTORY_PATH: &str = "/chat/history";
pub const DEFAULT_OPEN_WAIT_MS: u64 = 2000;
pub const DEFAULT_FALLBACK_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Duplex endpoint, `ws://` or `wss://`.
    pub ws_url: String,
    /// Extra headers sent with the WebSocket upgrade request.
    pub headers: Vec<(String, String)>,
    /// Base URL for the HTTP fallback and history endpoints.
    pub http_base_url: String,
    pub fallback_path: String,
    pub history_path: String,
    pub reconnect: ReconnectPolicy,
    /// How long a send waits for a connecting socket before falling back.
    pub open_wait: Duration,
    pub fallback_timeout: Duration,
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Config with default paths, timeouts and reconnect policy.
    #[must_use]
    pub fn new(ws_url: impl Into<String>, http_base_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            headers: Vec::new(),
            http_base_url: http_base_url.into().trim_end_matches('/').to_owned(),
            fallback_path: DEFAULT_FALLBACK_PATH.to_owned(),
            history_path: DEFAULT_HISTORY_PATH.to_owned(),
            reconnect: ReconnectPolicy::default(),
            open_wait: Duration::from_millis(DEFAULT_OPEN_WAIT_MS),
            fallback_timeout: Duration::from_millis(DEFAULT_FALLBACK_TIMEOUT_MS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Build typed session config from environment variables.
    ///
    /// Required:
    /// - `CHAT_WS_URL`
    /// - `CHAT_HTTP_BASE_URL`
    ///
    /// Optional:
    /// - `CHAT_FALLBACK_PATH`: default `/chat/send`
    /// - `CHAT_HISTORY_PATH`: default `/chat/history`
    /// - `CHAT_MAX_RECONNECT_ATTEMPTS`: default 5
    /// - `CHAT_RECONNECT_BASE_MS`: default 1000
    /// - `CHAT_RECONNECT_MAX_MS`: default 10000
    /// - `CHAT_MANUAL_RECONNECT_DELAY_MS`: default 1000
    /// - `CHAT_OPEN_WAIT_MS`: default 2000
    /// - `CHAT_FALLBACK_TIMEOUT_MS`: default 30000
    /// - `CHAT_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when a required variable is missing or a
    /// URL has the wrong scheme.
    pub fn from_env() -> Result<Self, ChatError> {
        let config = Self::new(required("CHAT_WS_URL")?, required("CHAT_HTTP_BASE_URL")?).with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the optional `CHAT_*` tuning variables on top of `self`.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = std::env::var("CHAT_FALLBACK_PATH") {
            self.fallback_path = path;
        }
        if let Ok(path) = std::env::var("CHAT_HISTORY_PATH") {
            self.history_path = path;
        }
        self.reconnect = ReconnectPolicy {
            base_delay: Duration::from_millis(env_parse_u64("CHAT_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)),
            max_delay: Duration::from_millis(env_parse_u64("CHAT_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)),
            max_attempts: std::env::var("CHAT_MAX_RECONNECT_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            manual_delay: Duration::from_millis(env_parse_u64(
                "CHAT_MANUAL_RECONNECT_DELAY_MS",
                DEFAULT_MANUAL_RECONNECT_DELAY_MS,
            )),
        };
        self.open_wait = Duration::from_millis(env_parse_u64("CHAT_OPEN_WAIT_MS", DEFAULT_OPEN_WAIT_MS));
        self.fallback_timeout =
            Duration::from_millis(env_parse_u64("CHAT_FALLBACK_TIMEOUT_MS", DEFAULT_FALLBACK_TIMEOUT_MS));
        self.connect_timeout =
            Duration::from_secs(env_parse_u64("CHAT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS));
        self
    }

    /// Check URL schemes.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] when the socket URL is not `ws(s)://` or
    /// the HTTP base is not `http(s)://`.
    pub fn validate(&self) -> Result<(), ChatError> {
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ChatError::Config(format!("CHAT_WS_URL must be ws:// or wss://, got {}", self.ws_url)));
        }
        if !(self.http_base_url.starts_with("http://") || self.http_base_url.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "CHAT_HTTP_BASE_URL must be http:// or https://, got {}",
                self.http_base_url
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn fallback_url(&self) -> String {
        format!("{}{}", self.http_base_url, self.fallback_path)
    }

    #[must_use]
    pub fn history_url(&self) -> String {
        format!("{}{}", self.http_base_url, self.history_path)
    }
}

fn required(key: &str) -> Result<String, ChatError> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ChatError::Config(format!("missing env var {key}")))
}

fn env_parse_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
