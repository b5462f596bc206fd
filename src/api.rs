//! One-shot HTTP endpoints: the fallback chat request and the history fetch.
//!
//! Response parsing is split into pure functions so envelope handling can be
//! tested without a server.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::config::SessionConfig;
use crate::error::ChatError;
use crate::message::{ChatMessage, HistoryRecord};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// HTTP collaborator used when no live stream is available.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Send one message and return the complete reply text.
    async fn ask(&self, message: &str, user_id: &str) -> Result<String, ChatError>;

    /// Fetch prior messages in conversation order.
    async fn history(&self, user_id: &str) -> Result<Vec<ChatMessage>, ChatError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

pub struct HttpChatApi {
    http: reqwest::Client,
    fallback_url: String,
    history_url: String,
}

impl HttpChatApi {
    /// Build the client with the configured fallback timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(config.fallback_timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChatError::Config(format!("http client build failed: {e}")))?;
        Ok(Self { http, fallback_url: config.fallback_url(), history_url: config.history_url() })
    }

    async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<(u16, String), reqwest::Error> {
        let response = self.http.post(url).form(form).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        Ok((status, text))
    }
}

#[async_trait::async_trait]
impl ChatApi for HttpChatApi {
    async fn ask(&self, message: &str, user_id: &str) -> Result<String, ChatError> {
        let (status, body) = self
            .post_form(&self.fallback_url, &[("message", message), ("userId", user_id)])
            .await
            .map_err(|e| ChatError::FallbackRequest(describe_request_error(&e)))?;
        parse_fallback_response(status, &body)
    }

    async fn history(&self, user_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let (status, body) = self
            .post_form(&self.history_url, &[("userId", user_id)])
            .await
            .map_err(|e| ChatError::HistoryRequest(describe_request_error(&e)))?;
        parse_history_response(status, &body)
    }
}

fn describe_request_error(e: &reqwest::Error) -> String {
    if e.is_timeout() { "request timed out".to_owned() } else { e.to_string() }
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

#[derive(Debug, Deserialize)]
struct FallbackEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<FallbackData>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FallbackData {
    #[serde(default)]
    message: Option<String>,
}

/// Parse the `{success, data:{message}}` fallback envelope.
///
/// # Errors
///
/// Returns [`ChatError::FallbackRequest`] for non-2xx status, unreadable
/// JSON, `success:false`, or a missing reply.
pub fn parse_fallback_response(status: u16, body: &str) -> Result<String, ChatError> {
    if !(200..300).contains(&status) {
        return Err(ChatError::FallbackRequest(format!("HTTP {status}")));
    }
    let envelope: FallbackEnvelope =
        serde_json::from_str(body).map_err(|e| ChatError::FallbackRequest(format!("invalid response: {e}")))?;
    if !envelope.success {
        let reason = envelope.message.unwrap_or_else(|| "server reported failure".to_owned());
        return Err(ChatError::FallbackRequest(reason));
    }
    envelope
        .data
        .and_then(|d| d.message)
        .ok_or_else(|| ChatError::FallbackRequest("response has no message".to_owned()))
}

/// Parse a history body: either a bare array of records or an envelope with
/// the array under `data`. Unmappable records are skipped.
///
/// # Errors
///
/// Returns [`ChatError::HistoryRequest`] for non-2xx status, unreadable JSON,
/// `success:false`, or a body with no record list.
pub fn parse_history_response(status: u16, body: &str) -> Result<Vec<ChatMessage>, ChatError> {
    if !(200..300).contains(&status) {
        return Err(ChatError::HistoryRequest(format!("HTTP {status}")));
    }
    let value: Value =
        serde_json::from_str(body).map_err(|e| ChatError::HistoryRequest(format!("invalid response: {e}")))?;

    let records = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            if map.get("success").and_then(Value::as_bool) == Some(false) {
                let reason = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("server reported failure")
                    .to_owned();
                return Err(ChatError::HistoryRequest(reason));
            }
            match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => return Err(ChatError::HistoryRequest("response has no data list".to_owned())),
            }
        }
        _ => return Err(ChatError::HistoryRequest("unexpected response shape".to_owned())),
    };

    Ok(records
        .into_iter()
        .filter_map(|item| serde_json::from_value::<HistoryRecord>(item).ok())
        .filter_map(HistoryRecord::into_message)
        .collect())
}

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;
