//! Chat messages and the conversation log.
//!
//! DESIGN
//! ======
//! A `user` message is created complete and never changes. An `assistant`
//! message starts `Pending`, moves to `Streaming` on its first delta, and ends
//! in `Complete` or `Errored`. Every mutator refuses to touch a terminal
//! message, so late frames cannot corrupt a finished reply.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ROLE / STREAM STATE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Position of a message in its streaming lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Pending,
    Streaming,
    Complete,
    Errored,
}

impl StreamState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored)
    }
}

// =============================================================================
// CHAT MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-generated unique identifier (UUID string).
    pub id: String,
    pub role: Role,
    /// Accumulated text. Grows across deltas for assistant messages.
    pub content: String,
    /// Milliseconds since the Unix epoch when the message was created.
    pub created_at: i64,
    pub stream_state: StreamState,
}

impl ChatMessage {
    /// A finished user message.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: text.into(),
            created_at: now_ms(),
            stream_state: StreamState::Complete,
        }
    }

    /// An empty assistant message waiting for its first delta.
    #[must_use]
    pub fn assistant_pending() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            created_at: now_ms(),
            stream_state: StreamState::Pending,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.stream_state.is_terminal()
    }

    /// Append a content delta. Returns `false` if the message is terminal.
    pub fn append_delta(&mut self, delta: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.content.push_str(delta);
        self.stream_state = StreamState::Streaming;
        true
    }

    /// Mark the message complete. Returns `false` if it was already terminal.
    pub fn complete(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.stream_state = StreamState::Complete;
        true
    }

    /// Append a visible error annotation and mark the message errored.
    pub fn fail_with_annotation(&mut self, reason: &str) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.content.push_str(&error_annotation(&self.content, reason));
        self.stream_state = StreamState::Errored;
        true
    }

    /// Mark the message errored without touching its content.
    pub fn fail_silently(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.stream_state = StreamState::Errored;
        true
    }
}

/// Annotation appended to a failed reply. The blank-line separator is only
/// inserted when there is existing content to separate from.
#[must_use]
pub fn error_annotation(existing: &str, reason: &str) -> String {
    if existing.is_empty() {
        format!("[错误: {reason}]")
    } else {
        format!("\n\n[错误: {reason}]")
    }
}

pub(crate) fn now_ms() -> i64 {
    let Ok(duration) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(duration.as_millis()).unwrap_or(0)
}

// =============================================================================
// HISTORY RECORD
// =============================================================================

/// A prior message as returned by the history endpoint.
///
/// Field names vary between backends, so the common aliases are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default, alias = "type", alias = "sender")]
    pub role: Option<String>,
    #[serde(default, alias = "message", alias = "text")]
    pub content: Option<String>,
    #[serde(default, alias = "createdAt", alias = "timestamp", alias = "createTime")]
    pub created_at: Option<i64>,
}

impl HistoryRecord {
    /// Map the record onto a terminal [`ChatMessage`].
    ///
    /// Returns `None` for unknown roles or missing content.
    #[must_use]
    pub fn into_message(self) -> Option<ChatMessage> {
        let role = match self.role.as_deref()?.to_ascii_lowercase().as_str() {
            "user" | "human" => Role::User,
            "assistant" | "ai" | "bot" => Role::Assistant,
            _ => return None,
        };
        let content = self.content?;
        let id = match self.id {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Some(ChatMessage {
            id,
            role,
            content,
            created_at: self.created_at.unwrap_or_else(now_ms),
            stream_state: StreamState::Complete,
        })
    }
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// Ordered message log owned by one session.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    /// Replace the log with `history`, keeping the in-flight exchange.
    ///
    /// When `active_id` names a message in the log, that message and the
    /// user message directly before it are carried over after the history.
    pub fn replace_history(&mut self, history: Vec<ChatMessage>, active_id: Option<&str>) {
        let pinned = self.take_in_flight(active_id);
        let mut next: Vec<ChatMessage> = history
            .into_iter()
            .filter(|h| !pinned.iter().any(|p| p.id == h.id))
            .collect();
        next.extend(pinned);
        self.messages = next;
    }

    /// Prepend history entries whose ids are not already in the log.
    pub fn merge_history(&mut self, history: Vec<ChatMessage>) {
        let older: Vec<ChatMessage> = history
            .into_iter()
            .filter(|h| self.get(&h.id).is_none())
            .collect();
        if older.is_empty() {
            return;
        }
        let mut next = older;
        next.append(&mut self.messages);
        self.messages = next;
    }

    fn take_in_flight(&mut self, active_id: Option<&str>) -> Vec<ChatMessage> {
        let Some(active_id) = active_id else {
            return Vec::new();
        };
        let Some(index) = self.messages.iter().position(|m| m.id == active_id) else {
            return Vec::new();
        };
        let start = if index > 0 && self.messages[index - 1].role == Role::User {
            index - 1
        } else {
            index
        };
        self.messages.drain(start..=index).collect()
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
