//! Wire protocol for the chat socket.
//!
//! DESIGN
//! ======
//! Inbound frames are plain strings, one per transport message. A frame is
//! either a sentinel (`[STREAM_END]`, `[ERROR]reason`, ...) or a raw content
//! delta. [`decode`] turns each frame into an [`Inbound`] variant so the
//! session never inspects string prefixes itself.
//!
//! Outbound frames are JSON objects: an `auth` handshake sent right after the
//! socket opens, and one chat frame per user message.

use serde::Serialize;

use crate::credentials::Credentials;
use crate::error::ChatError;

pub const STREAM_START: &str = "[STREAM_START]";
pub const STREAM_END: &str = "[STREAM_END]";
pub const STREAM_ERROR: &str = "[STREAM_ERROR]";
pub const ERROR: &str = "[ERROR]";
pub const AUTH_SUCCESS: &str = "[AUTH_SUCCESS]";
pub const AUTH_FAILED: &str = "[AUTH_FAILED]";
pub const AUTH_ERROR: &str = "[AUTH_ERROR]";

// =============================================================================
// INBOUND
// =============================================================================

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    StreamStart,
    StreamEnd,
    /// Stream failed for the active message.
    StreamError(String),
    /// Session-level error, not tied to message content.
    SessionError(String),
    AuthSuccess,
    AuthFailed(String),
    /// Raw content to append verbatim.
    Delta(String),
}

/// Decode one inbound frame.
///
/// `[STREAM_ERROR]` is tested before `[ERROR]`; anything that matches no
/// sentinel is a content delta.
#[must_use]
pub fn decode(raw: &str) -> Inbound {
    if raw.starts_with(STREAM_START) {
        return Inbound::StreamStart;
    }
    if raw.starts_with(STREAM_END) {
        return Inbound::StreamEnd;
    }
    if let Some(reason) = raw.strip_prefix(STREAM_ERROR) {
        return Inbound::StreamError(reason.trim().to_owned());
    }
    if let Some(reason) = raw.strip_prefix(ERROR) {
        return Inbound::SessionError(reason.trim().to_owned());
    }
    if raw.starts_with(AUTH_SUCCESS) {
        return Inbound::AuthSuccess;
    }
    if let Some(reason) = raw
        .strip_prefix(AUTH_FAILED)
        .or_else(|| raw.strip_prefix(AUTH_ERROR))
    {
        return Inbound::AuthFailed(reason.trim().to_owned());
    }
    Inbound::Delta(raw.to_owned())
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    token: &'a str,
    user_id: &'a str,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatFrame<'a> {
    message: &'a str,
    user_id: &'a str,
    message_id: &'a str,
    token: &'a str,
}

/// Encode the handshake frame sent immediately after the socket opens.
///
/// # Errors
///
/// Returns [`ChatError::Encode`] if serialization fails.
pub fn encode_auth(credentials: &Credentials, timestamp: i64) -> Result<String, ChatError> {
    let frame = AuthFrame {
        kind: "auth",
        token: &credentials.token,
        user_id: &credentials.user_id,
        timestamp,
    };
    serde_json::to_string(&frame).map_err(|e| ChatError::Encode(e.to_string()))
}

/// Encode a chat send frame for the assistant message `message_id`.
///
/// # Errors
///
/// Returns [`ChatError::Encode`] if serialization fails.
pub fn encode_chat(text: &str, message_id: &str, credentials: &Credentials) -> Result<String, ChatError> {
    let frame = ChatFrame {
        message: text,
        user_id: &credentials.user_id,
        message_id,
        token: &credentials.token,
    };
    serde_json::to_string(&frame).map_err(|e| ChatError::Encode(e.to_string()))
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
