//! Session core: all chat-session state and transitions, no I/O.
//!
//! DESIGN
//! ======
//! Every input (user send, transport event, timer, fallback reply, typing
//! step) is a method that mutates state and returns the [`Effect`]s the driver
//! must carry out. The driver owns sockets, timers and spawned tasks; the core
//! owns the connection state machine, the conversation and the single
//! in-flight send.
//!
//! INVARIANTS
//! ==========
//! - At most one assistant message is active. `active_message_id()` is set
//!   from the moment a send is accepted until a terminal outcome is applied,
//!   and every failure path clears it.
//! - The live/fallback decision is made once per send. A send that started on
//!   the fallback path ignores socket frames even if the socket opens later;
//!   a live send ignores typing steps.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::credentials::{CredentialStore, Credentials};
use crate::error::ChatError;
use crate::lifecycle::{ConnectionSession, ConnectionSnapshot, ConnectionStatus, LifecycleAction};
use crate::message::{ChatMessage, Conversation, now_ms};
use crate::protocol::{self, Inbound};
use crate::transport::TransportEvent;
use crate::typing::TypingStep;

// =============================================================================
// EVENTS / EFFECTS
// =============================================================================

/// What the UI observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Text appended to an assistant message.
    Delta { message_id: String, text: String },
    /// The assistant message finished normally.
    Complete { message_id: String },
    /// A failure; `message_id` is set when a message was terminated by it.
    Error { message_id: Option<String>, error: ChatError },
    /// User-visible notice (toast).
    Notice(String),
}

/// Side effect for the driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    SendFrame(String),
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Fall back if the socket has not opened within `after`.
    ArmOpenWait { message_id: String, after: Duration },
    CancelOpenWait,
    RequestFallback { message_id: String, text: String, user_id: String },
    StartTyping { message_id: String, response: String },
    /// Abort any running fallback request and typing run.
    CancelBackground,
    Emit(SessionEvent),
}

/// How the in-flight send is being answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPath {
    /// Socket is connecting; waiting for open before deciding.
    AwaitingOpen,
    Live,
    Fallback,
}

#[derive(Debug, Clone)]
struct ActiveSend {
    message_id: String,
    text: String,
    path: SendPath,
}

// =============================================================================
// SESSION CORE
// =============================================================================

pub struct SessionCore {
    connection: ConnectionSession,
    conversation: Conversation,
    active: Option<ActiveSend>,
    credentials: Arc<dyn CredentialStore>,
    open_wait: Duration,
}

impl SessionCore {
    #[must_use]
    pub fn new(config: &SessionConfig, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            connection: ConnectionSession::new(config.reconnect),
            conversation: Conversation::new(),
            active: None,
            credentials,
            open_wait: config.open_wait,
        }
    }

    #[must_use]
    pub fn active_message_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.message_id.as_str())
    }

    #[must_use]
    pub fn active_path(&self) -> Option<SendPath> {
        self.active.as_ref().map(|a| a.path)
    }

    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.connection.snapshot()
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        Credentials::load(self.credentials.as_ref())
    }

    // -------------------------------------------------------------------------
    // connection
    // -------------------------------------------------------------------------

    pub fn connect(&mut self) -> Vec<Effect> {
        let actions = self.connection.connect();
        self.lifecycle(actions)
    }

    pub fn on_reconnect_due(&mut self) -> Vec<Effect> {
        let actions = self.connection.on_reconnect_due();
        self.lifecycle(actions)
    }

    /// Close the socket, reset the attempt counter and reconnect shortly.
    /// A reply streaming over the old socket is terminated.
    pub fn manual_reconnect(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.active_path() == Some(SendPath::Live) {
            effects.extend(self.fail_active(ChatError::ConnectionLost, Annotation::Reason("连接已重置")));
        }
        let actions = self.connection.manual_reconnect();
        effects.extend(self.lifecycle(actions));
        effects
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) -> Vec<Effect> {
        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(raw) => self.on_frame(&raw),
            TransportEvent::Closed(reason) => self.on_down(reason.as_deref().unwrap_or("closed")),
            TransportEvent::Error(reason) => self.on_down(&reason),
        }
    }

    fn on_open(&mut self) -> Vec<Effect> {
        let actions = self.connection.on_open();
        let mut effects = self.lifecycle(actions);
        if self.active_path() == Some(SendPath::AwaitingOpen) && self.connection.is_ready() {
            effects.push(Effect::CancelOpenWait);
            effects.extend(self.dispatch_live());
        }
        effects
    }

    fn on_down(&mut self, reason: &str) -> Vec<Effect> {
        let was_connected =
            matches!(self.connection.status(), ConnectionStatus::Connecting | ConnectionStatus::Open);
        let actions = self.connection.on_down(reason);
        let mut effects = self.lifecycle(actions);
        if !was_connected {
            return effects;
        }
        match self.active_path() {
            Some(SendPath::Live) => {
                effects.extend(self.fail_active(ChatError::ConnectionLost, Annotation::Reason("连接已断开")));
            }
            Some(SendPath::AwaitingOpen) => {
                effects.push(Effect::CancelOpenWait);
                effects.extend(self.start_fallback());
            }
            Some(SendPath::Fallback) | None => {}
        }
        effects
    }

    /// Translate lifecycle actions into driver effects.
    fn lifecycle(&mut self, actions: Vec<LifecycleAction>) -> Vec<Effect> {
        let mut effects = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                LifecycleAction::OpenTransport => effects.push(Effect::OpenTransport),
                LifecycleAction::CloseTransport => effects.push(Effect::CloseTransport),
                LifecycleAction::ScheduleReconnect(delay) => effects.push(Effect::ScheduleReconnect(delay)),
                LifecycleAction::CancelReconnect => effects.push(Effect::CancelReconnect),
                LifecycleAction::SendAuth => match self.credentials() {
                    Some(creds) => match protocol::encode_auth(&creds, now_ms()) {
                        Ok(frame) => effects.push(Effect::SendFrame(frame)),
                        Err(e) => warn!(error = %e, "auth frame encode failed"),
                    },
                    None => warn!("no token in credential store; auth handshake skipped"),
                },
                LifecycleAction::Exhausted { attempts } => {
                    effects.push(Effect::Emit(SessionEvent::Error {
                        message_id: None,
                        error: ChatError::ReconnectExhausted { attempts },
                    }));
                    effects.push(Effect::Emit(SessionEvent::Notice(
                        "聊天服务连接失败，已切换为普通模式".to_owned(),
                    )));
                }
            }
        }
        effects
    }

    // -------------------------------------------------------------------------
    // inbound frames
    // -------------------------------------------------------------------------

    fn on_frame(&mut self, raw: &str) -> Vec<Effect> {
        match protocol::decode(raw) {
            Inbound::StreamStart => {
                debug!(message_id = ?self.active_message_id(), "stream start");
                Vec::new()
            }
            Inbound::Delta(text) => self.apply_live_delta(text),
            Inbound::StreamEnd => {
                if self.active_path() == Some(SendPath::Live) {
                    self.complete_active()
                } else {
                    debug!("stream end without live message ignored");
                    Vec::new()
                }
            }
            Inbound::StreamError(reason) => {
                if self.active_path() == Some(SendPath::Live) {
                    let annotation = reason.clone();
                    self.fail_active(ChatError::StreamProtocol(reason), Annotation::Owned(annotation))
                } else {
                    warn!(reason, "stream error without live message");
                    Vec::new()
                }
            }
            Inbound::SessionError(reason) => {
                warn!(reason, "session error from server");
                let mut effects = vec![Effect::Emit(SessionEvent::Notice(reason.clone()))];
                if self.active_path() == Some(SendPath::Live) {
                    effects.extend(self.fail_active(ChatError::SessionLevel(reason), Annotation::None));
                } else {
                    effects.push(Effect::Emit(SessionEvent::Error {
                        message_id: None,
                        error: ChatError::SessionLevel(reason),
                    }));
                }
                effects
            }
            Inbound::AuthSuccess => {
                let actions = self.connection.on_auth_result(true);
                self.lifecycle(actions)
            }
            Inbound::AuthFailed(reason) => {
                let actions = self.connection.on_auth_result(false);
                let reason = if reason.is_empty() { "认证失败".to_owned() } else { reason };
                let mut effects = vec![Effect::Emit(SessionEvent::Notice(format!("认证失败: {reason}")))];
                if self.active_path() == Some(SendPath::Live) {
                    let annotation = reason.clone();
                    effects.extend(self.fail_active(ChatError::AuthRejected(reason), Annotation::Owned(annotation)));
                } else {
                    effects.push(Effect::Emit(SessionEvent::Error {
                        message_id: None,
                        error: ChatError::AuthRejected(reason),
                    }));
                }
                effects.extend(self.lifecycle(actions));
                effects
            }
        }
    }

    fn apply_live_delta(&mut self, text: String) -> Vec<Effect> {
        if text.is_empty() {
            debug!("empty frame ignored");
            return Vec::new();
        }
        let Some(active) = self.active.as_ref().filter(|a| a.path == SendPath::Live) else {
            warn!(len = text.len(), "delta without live message dropped");
            return Vec::new();
        };
        let message_id = active.message_id.clone();
        self.append(message_id, text)
    }

    // -------------------------------------------------------------------------
    // sending
    // -------------------------------------------------------------------------

    /// Accept a user message and decide how it will be answered.
    ///
    /// Returns the id of the new assistant message.
    ///
    /// # Errors
    ///
    /// - [`ChatError::SessionClosed`] after dispose
    /// - [`ChatError::EmptyMessage`] when `text` is blank
    /// - [`ChatError::Busy`] while a previous reply is in flight
    /// - [`ChatError::MissingCredentials`] when no token is stored
    pub fn send_message(&mut self, text: &str) -> Result<(String, Vec<Effect>), ChatError> {
        if self.connection.is_disposed() {
            return Err(ChatError::SessionClosed);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(active) = &self.active {
            debug!(message_id = %active.message_id, "send rejected: reply in progress");
            return Err(ChatError::Busy);
        }
        if self.credentials().is_none() {
            return Err(ChatError::MissingCredentials);
        }

        self.conversation.push(ChatMessage::user(text));
        let assistant = ChatMessage::assistant_pending();
        let message_id = assistant.id.clone();
        self.conversation.push(assistant);
        self.active = Some(ActiveSend {
            message_id: message_id.clone(),
            text: text.to_owned(),
            path: SendPath::AwaitingOpen,
        });

        let effects = if self.connection.is_ready() {
            self.dispatch_live()
        } else if self.connection.status() == ConnectionStatus::Connecting {
            info!(%message_id, "socket connecting; waiting before send");
            vec![Effect::ArmOpenWait { message_id: message_id.clone(), after: self.open_wait }]
        } else {
            self.start_fallback()
        };
        Ok((message_id, effects))
    }

    fn dispatch_live(&mut self) -> Vec<Effect> {
        let Some(creds) = self.credentials() else {
            return self.fail_active(ChatError::MissingCredentials, Annotation::Reason("未登录"));
        };
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        match protocol::encode_chat(&active.text, &active.message_id, &creds) {
            Ok(frame) => {
                active.path = SendPath::Live;
                info!(message_id = %active.message_id, "message sent over socket");
                vec![Effect::SendFrame(frame)]
            }
            Err(e) => {
                warn!(error = %e, "chat frame encode failed; using fallback");
                self.start_fallback()
            }
        }
    }

    fn start_fallback(&mut self) -> Vec<Effect> {
        let user_id = self.credentials().map(|c| c.user_id).unwrap_or_default();
        let Some(active) = self.active.as_mut() else {
            return Vec::new();
        };
        active.path = SendPath::Fallback;
        info!(message_id = %active.message_id, "message sent over http fallback");
        vec![Effect::RequestFallback {
            message_id: active.message_id.clone(),
            text: active.text.clone(),
            user_id,
        }]
    }

    /// The open-wait timer for `message_id` fired.
    pub fn on_open_wait_expired(&mut self, message_id: &str) -> Vec<Effect> {
        match &self.active {
            Some(active) if active.message_id == message_id && active.path == SendPath::AwaitingOpen => {
                info!(message_id, "socket not open in time; falling back");
                self.start_fallback()
            }
            _ => Vec::new(),
        }
    }

    /// The HTTP fallback for `message_id` finished.
    pub fn on_fallback_reply(&mut self, message_id: &str, result: Result<String, ChatError>) -> Vec<Effect> {
        if !self.is_active_on(message_id, SendPath::Fallback) {
            debug!(message_id, "stale fallback reply ignored");
            return Vec::new();
        }
        match result {
            Ok(response) => vec![Effect::StartTyping { message_id: message_id.to_owned(), response }],
            Err(error) => {
                warn!(message_id, error = %error, "fallback request failed");
                let notice = Effect::Emit(SessionEvent::Notice("发送失败，请稍后重试".to_owned()));
                let annotation = match &error {
                    ChatError::FallbackRequest(reason) => reason.clone(),
                    other => other.to_string(),
                };
                let mut effects = self.fail_active(error, Annotation::Owned(annotation));
                effects.push(notice);
                effects
            }
        }
    }

    /// One step of the typing run for `message_id`.
    pub fn on_typing_step(&mut self, message_id: &str, step: TypingStep) -> Vec<Effect> {
        if !self.is_active_on(message_id, SendPath::Fallback) {
            debug!(message_id, "stale typing step ignored");
            return Vec::new();
        }
        match step {
            TypingStep::Delta(text) => self.append(message_id.to_owned(), text),
            TypingStep::Done => self.complete_active(),
        }
    }

    // -------------------------------------------------------------------------
    // history
    // -------------------------------------------------------------------------

    pub fn replace_history(&mut self, history: Vec<ChatMessage>) {
        let active = self.active.as_ref().map(|a| a.message_id.clone());
        self.conversation.replace_history(history, active.as_deref());
    }

    pub fn merge_history(&mut self, history: Vec<ChatMessage>) {
        self.conversation.merge_history(history);
    }

    // -------------------------------------------------------------------------
    // teardown
    // -------------------------------------------------------------------------

    /// Close everything. Later inputs are ignored.
    pub fn dispose(&mut self) -> Vec<Effect> {
        let actions = self.connection.dispose();
        let mut effects = self.lifecycle(actions);
        if !effects.is_empty() {
            effects.push(Effect::CancelOpenWait);
            effects.push(Effect::CancelBackground);
        }
        self.active = None;
        effects
    }

    // -------------------------------------------------------------------------
    // message helpers
    // -------------------------------------------------------------------------

    fn is_active_on(&self, message_id: &str, path: SendPath) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.message_id == message_id && a.path == path)
    }

    fn append(&mut self, message_id: String, text: String) -> Vec<Effect> {
        let Some(message) = self.conversation.get_mut(&message_id) else {
            return Vec::new();
        };
        if !message.append_delta(&text) {
            return Vec::new();
        }
        vec![Effect::Emit(SessionEvent::Delta { message_id, text })]
    }

    fn complete_active(&mut self) -> Vec<Effect> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };
        if let Some(message) = self.conversation.get_mut(&active.message_id) {
            message.complete();
        }
        info!(message_id = %active.message_id, "reply complete");
        vec![Effect::Emit(SessionEvent::Complete { message_id: active.message_id })]
    }

    fn fail_active(&mut self, error: ChatError, annotation: Annotation) -> Vec<Effect> {
        let Some(active) = self.active.take() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        if active.path == SendPath::AwaitingOpen {
            effects.push(Effect::CancelOpenWait);
        }
        if let Some(message) = self.conversation.get_mut(&active.message_id) {
            match annotation {
                Annotation::None => message.fail_silently(),
                Annotation::Reason(reason) => message.fail_with_annotation(reason),
                Annotation::Owned(reason) => message.fail_with_annotation(&reason),
            };
        }
        warn!(message_id = %active.message_id, error = %error, "reply failed");
        effects.push(Effect::Emit(SessionEvent::Error { message_id: Some(active.message_id), error }));
        effects
    }
}

/// Text appended to a failed message.
enum Annotation {
    None,
    Reason(&'static str),
    Owned(String),
}

#[cfg(test)]
#[path = "core_test.rs"]
mod tests;
