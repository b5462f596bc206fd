//! Session facade and its driver task.
//!
//! DESIGN
//! ======
//! [`ChatSession`] is the only type the UI touches. It owns a single tokio
//! task (the driver) that owns the [`SessionCore`] exclusively. Facade calls,
//! transport events, fallback replies, typing steps and timers are all
//! messages into the driver's `select!` loop, so state changes are strictly
//! sequential and no locks are needed.
//!
//! LIFECYCLE
//! =========
//! 1. `spawn` → driver starts and connects immediately
//! 2. Core transitions return `Effect`s → driver opens sockets, arms timers,
//!    spawns fallback/typing tasks, forwards events to the UI
//! 3. `dispose` (or dropping the facade) → transport closed, timers cleared,
//!    background tasks aborted, driver exits

pub mod core;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ChatApi, HttpChatApi};
use crate::config::SessionConfig;
use crate::credentials::CredentialStore;
use crate::error::ChatError;
use crate::lifecycle::ConnectionSnapshot;
use crate::message::ChatMessage;
use crate::transport::{ConnectRequest, Connector, TransportEvent, TransportHandle, TransportSink, WsConnector};
use crate::typing::{self, TypingStep};

pub use self::core::{Effect, SendPath, SessionCore, SessionEvent};

/// Point-in-time copy of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub messages: Vec<ChatMessage>,
    pub active_message_id: Option<String>,
}

enum Command {
    Send { text: String, reply: oneshot::Sender<Result<String, ChatError>> },
    Reconnect,
    ReplaceHistory(Vec<ChatMessage>),
    MergeHistory(Vec<ChatMessage>),
    LoadHistory { reply: oneshot::Sender<Result<usize, ChatError>> },
    View { reply: oneshot::Sender<SessionView> },
    Dispose { reply: oneshot::Sender<()> },
}

enum Internal {
    FallbackReply { message_id: String, result: Result<String, ChatError> },
    Typing { message_id: String, step: TypingStep },
    HistoryLoaded { result: Result<Vec<ChatMessage>, ChatError>, reply: oneshot::Sender<Result<usize, ChatError>> },
}

// =============================================================================
// FACADE
// =============================================================================

/// Handle to one chat session. Dropping it tears the session down.
pub struct ChatSession {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    status: watch::Receiver<ConnectionSnapshot>,
    task: JoinHandle<()>,
}

impl ChatSession {
    /// Start a session over WebSocket with the HTTP fallback.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if the HTTP client cannot be built.
    pub fn open(config: SessionConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, ChatError> {
        let api = HttpChatApi::new(&config)?;
        let connector = WsConnector::new(config.connect_timeout);
        Ok(Self::spawn(config, credentials, Arc::new(connector), Arc::new(api)))
    }

    /// Start a session with explicit collaborators. Must be called inside a
    /// tokio runtime.
    #[must_use]
    pub fn spawn(
        config: SessionConfig,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
    ) -> Self {
        let core = SessionCore::new(&config, credentials);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        // Unbounded: the driver never waits on the UI. Drained by `next_event`.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(core.snapshot());
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            core,
            request: ConnectRequest { url: config.ws_url.clone(), headers: config.headers.clone() },
            connector,
            api,
            transport: None,
            generation: 0,
            transport_tx,
            internal_tx,
            events: event_tx,
            status: status_tx,
            reconnect_at: None,
            open_wait: None,
            fallback_task: None,
            typing_task: None,
            history_task: None,
        };
        let task = tokio::spawn(driver.run(command_rx, transport_rx, internal_rx));

        Self { commands: command_tx, events: event_rx, status: status_rx, task }
    }

    /// Send a user message. Returns the id of the assistant message that
    /// will carry the reply.
    ///
    /// # Errors
    ///
    /// Rejections (`EmptyMessage`, `MissingCredentials`, `Busy`) are returned
    /// here and also announced as a [`SessionEvent::Notice`]. Failures after
    /// acceptance arrive on the event stream instead.
    pub async fn send_message(&self, text: impl Into<String>) -> Result<String, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send { text: text.into(), reply })?;
        rx.await.map_err(|_| ChatError::SessionClosed)?
    }

    /// Close the socket, reset the retry counter and reconnect shortly.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after dispose.
    pub fn reconnect(&self) -> Result<(), ChatError> {
        self.command(Command::Reconnect)
    }

    /// Replace the log with `history`, keeping an in-flight exchange.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after dispose.
    pub fn replace_history(&self, history: Vec<ChatMessage>) -> Result<(), ChatError> {
        self.command(Command::ReplaceHistory(history))
    }

    /// Prepend history entries the log does not already contain.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after dispose.
    pub fn merge_history(&self, history: Vec<ChatMessage>) -> Result<(), ChatError> {
        self.command(Command::MergeHistory(history))
    }

    /// Fetch history from the server and replace the log with it. Returns the
    /// number of messages loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::MissingCredentials`], [`ChatError::HistoryRequest`],
    /// or [`ChatError::SessionClosed`].
    pub async fn load_history(&self) -> Result<usize, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::LoadHistory { reply })?;
        rx.await.map_err(|_| ChatError::SessionClosed)?
    }

    /// Copy of the conversation and the active message id.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after dispose.
    pub async fn view(&self) -> Result<SessionView, ChatError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::View { reply })?;
        rx.await.map_err(|_| ChatError::SessionClosed)
    }

    /// Copy of the conversation log.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::SessionClosed`] after dispose.
    pub async fn messages(&self) -> Result<Vec<ChatMessage>, ChatError> {
        self.view().await.map(|view| view.messages)
    }

    /// Next UI event. `None` once the session has shut down and every
    /// buffered event was read.
    ///
    /// Events are queued without bound and never dropped, so the caller must
    /// keep draining this for the life of the session. A UI that stops
    /// reading grows the queue by one entry per streamed delta.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Observable connection state.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status.clone()
    }

    /// Tear the session down and wait for the driver to finish.
    pub async fn dispose(self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Dispose { reply }).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }

    fn command(&self, command: Command) -> Result<(), ChatError> {
        self.commands.send(command).map_err(|_| ChatError::SessionClosed)
    }
}

// =============================================================================
// DRIVER
// =============================================================================

struct Driver {
    core: SessionCore,
    request: ConnectRequest,
    connector: Arc<dyn Connector>,
    api: Arc<dyn ChatApi>,
    transport: Option<Box<dyn TransportHandle>>,
    generation: u64,
    transport_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<ConnectionSnapshot>,
    reconnect_at: Option<Instant>,
    open_wait: Option<(String, Instant)>,
    fallback_task: Option<JoinHandle<()>>,
    typing_task: Option<JoinHandle<()>>,
    history_task: Option<JoinHandle<()>>,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        let effects = self.core.connect();
        self.apply(effects);
        self.publish_status();

        loop {
            let open_wait_at = self.open_wait.as_ref().map(|(_, at)| *at);
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command) {
                        return;
                    }
                }
                Some((generation, event)) = transport_rx.recv() => {
                    if generation == self.generation {
                        let effects = self.core.on_transport_event(event);
                        self.apply(effects);
                    } else {
                        debug!(generation, current = self.generation, ?event, "stale transport event dropped");
                    }
                }
                Some(internal) = internal_rx.recv() => self.handle_internal(internal),
                () = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    let effects = self.core.on_reconnect_due();
                    self.apply(effects);
                }
                () = sleep_until_opt(open_wait_at) => {
                    if let Some((message_id, _)) = self.open_wait.take() {
                        let effects = self.core.on_open_wait_expired(&message_id);
                        self.apply(effects);
                    }
                }
            }
            self.publish_status();
        }

        info!("chat session handle dropped; shutting down");
        self.shutdown();
    }

    /// Returns `false` once the session has been disposed.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send { text, reply } => {
                let result = match self.core.send_message(&text) {
                    Ok((message_id, effects)) => {
                        self.apply(effects);
                        Ok(message_id)
                    }
                    Err(e) => {
                        let _ = self.events.send(SessionEvent::Notice(e.to_string()));
                        Err(e)
                    }
                };
                let _ = reply.send(result);
            }
            Command::Reconnect => {
                let effects = self.core.manual_reconnect();
                self.apply(effects);
            }
            Command::ReplaceHistory(history) => self.core.replace_history(history),
            Command::MergeHistory(history) => self.core.merge_history(history),
            Command::LoadHistory { reply } => {
                let Some(creds) = self.core.credentials() else {
                    let _ = reply.send(Err(ChatError::MissingCredentials));
                    return true;
                };
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                abort_task(&mut self.history_task);
                self.history_task = Some(tokio::spawn(async move {
                    let result = api.history(&creds.user_id).await;
                    let _ = tx.send(Internal::HistoryLoaded { result, reply });
                }));
            }
            Command::View { reply } => {
                let _ = reply.send(SessionView {
                    messages: self.core.conversation().messages().to_vec(),
                    active_message_id: self.core.active_message_id().map(str::to_owned),
                });
            }
            Command::Dispose { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::FallbackReply { message_id, result } => {
                let effects = self.core.on_fallback_reply(&message_id, result);
                self.apply(effects);
            }
            Internal::Typing { message_id, step } => {
                let effects = self.core.on_typing_step(&message_id, step);
                self.apply(effects);
            }
            Internal::HistoryLoaded { result, reply } => {
                let result = result.map(|history| {
                    let count = history.len();
                    self.core.replace_history(history);
                    count
                });
                if let Err(e) = &result {
                    warn!(error = %e, "history load failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::OpenTransport => {
                    self.generation += 1;
                    let sink = TransportSink::new(self.generation, self.transport_tx.clone());
                    self.transport = Some(self.connector.connect(self.request.clone(), sink));
                }
                Effect::CloseTransport => {
                    self.generation += 1;
                    if let Some(mut transport) = self.transport.take() {
                        transport.close();
                    }
                }
                Effect::SendFrame(frame) => match &self.transport {
                    Some(transport) => {
                        if let Err(e) = transport.send(frame) {
                            warn!(generation = self.generation, error = %e, "frame not sent");
                        }
                    }
                    None => warn!("no transport; frame dropped"),
                },
                Effect::ScheduleReconnect(delay) => self.reconnect_at = Some(Instant::now() + delay),
                Effect::CancelReconnect => self.reconnect_at = None,
                Effect::ArmOpenWait { message_id, after } => {
                    self.open_wait = Some((message_id, Instant::now() + after));
                }
                Effect::CancelOpenWait => self.open_wait = None,
                Effect::RequestFallback { message_id, text, user_id } => {
                    let api = Arc::clone(&self.api);
                    let tx = self.internal_tx.clone();
                    abort_task(&mut self.fallback_task);
                    self.fallback_task = Some(tokio::spawn(async move {
                        let result = api.ask(&text, &user_id).await;
                        let _ = tx.send(Internal::FallbackReply { message_id, result });
                    }));
                }
                Effect::StartTyping { message_id, response } => {
                    abort_task(&mut self.typing_task);
                    self.typing_task = Some(typing::spawn(
                        message_id,
                        response,
                        self.internal_tx.clone(),
                        |message_id, step| Internal::Typing { message_id, step },
                    ));
                }
                Effect::CancelBackground => {
                    abort_task(&mut self.fallback_task);
                    abort_task(&mut self.typing_task);
                    abort_task(&mut self.history_task);
                }
                Effect::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
    }

    fn publish_status(&self) {
        let next = self.core.snapshot();
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn shutdown(&mut self) {
        let effects = self.core.dispose();
        self.apply(effects);
        self.publish_status();
        info!("chat session disposed");
    }
}

fn abort_task(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
