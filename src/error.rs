//! Error taxonomy for the chat session.
//!
//! Transport-level failures (`TransportOpen`, `TransportSend`) are recovered
//! inside the session by the reconnect loop and only ever show up in logs.
//! The facade returns the rejection variants (`EmptyMessage`,
//! `MissingCredentials`, `Busy`) directly to the caller; the remaining
//! variants travel on the event stream as [`crate::session::SessionEvent::Error`].

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by the chat session and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// The duplex connection could not be established.
    #[error("transport open failed: {0}")]
    TransportOpen(String),

    /// A frame could not be handed to the transport.
    #[error("transport send failed: {0}")]
    TransportSend(String),

    /// The server rejected the authentication handshake.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// Every scheduled reconnect failed; the session stays unavailable until
    /// a manual reconnect.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    /// `[STREAM_ERROR]` received for the active message.
    #[error("stream error: {0}")]
    StreamProtocol(String),

    /// `[ERROR]` received; not tied to message content.
    #[error("session error: {0}")]
    SessionLevel(String),

    /// The live connection dropped while a reply was streaming.
    #[error("connection lost while streaming")]
    ConnectionLost,

    /// The one-shot HTTP fallback failed (non-2xx, timeout, or `success:false`).
    #[error("fallback request failed: {0}")]
    FallbackRequest(String),

    /// The history endpoint failed or returned an unreadable body.
    #[error("history request failed: {0}")]
    HistoryRequest(String),

    /// The outgoing text was empty after trimming.
    #[error("message is empty")]
    EmptyMessage,

    /// No auth token is available in the credential store.
    #[error("not signed in: no token in credential store")]
    MissingCredentials,

    /// A reply is still streaming for the previous message.
    #[error("a reply is still in progress")]
    Busy,

    /// A configuration value is missing or invalid.
    #[error("config error: {0}")]
    Config(String),

    /// An outbound frame could not be serialized.
    #[error("frame encode failed: {0}")]
    Encode(String),

    /// The session task has shut down.
    #[error("chat session closed")]
    SessionClosed,
}

impl ChatError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::TransportOpen(_) => "E_TRANSPORT_OPEN",
            Self::TransportSend(_) => "E_TRANSPORT_SEND",
            Self::AuthRejected(_) => "E_AUTH_REJECTED",
            Self::ReconnectExhausted { .. } => "E_RECONNECT_EXHAUSTED",
            Self::StreamProtocol(_) => "E_STREAM_ERROR",
            Self::SessionLevel(_) => "E_SESSION_ERROR",
            Self::ConnectionLost => "E_CONNECTION_LOST",
            Self::FallbackRequest(_) => "E_FALLBACK_REQUEST",
            Self::HistoryRequest(_) => "E_HISTORY_REQUEST",
            Self::EmptyMessage => "E_EMPTY_MESSAGE",
            Self::MissingCredentials => "E_MISSING_CREDENTIALS",
            Self::Busy => "E_BUSY",
            Self::Config(_) => "E_CONFIG",
            Self::Encode(_) => "E_ENCODE",
            Self::SessionClosed => "E_SESSION_CLOSED",
        }
    }

    /// Whether the caller can reasonably try the same operation again.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen(_)
                | Self::TransportSend(_)
                | Self::StreamProtocol(_)
                | Self::SessionLevel(_)
                | Self::ConnectionLost
                | Self::FallbackRequest(_)
                | Self::HistoryRequest(_)
                | Self::Busy
        )
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
