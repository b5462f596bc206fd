//! Transport layer: one persistent duplex connection.
//!
//! DESIGN
//! ======
//! A [`Connector`] opens a connection in the background and reports progress
//! through a [`TransportSink`]; the returned [`TransportHandle`] only sends and
//! closes. No frame content is interpreted here.
//!
//! Every event is tagged with the generation the driver assigned when it
//! opened the connection, so events from a superseded connection can be told
//! apart from the current one.

pub mod ws;

use tokio::sync::mpsc;

use crate::error::ChatError;

pub use ws::WsConnector;

/// Progress reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    /// One complete inbound text frame.
    Message(String),
    /// The connection closed, with the peer's reason if it sent one.
    Closed(Option<String>),
    /// Open, read, or write failure.
    Error(String),
}

/// Generation-tagged channel a transport reports into.
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    #[must_use]
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns `false` when nobody is listening any more.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }
}

/// Where to connect and which extra headers to send with the upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

/// Opens connections. The connect itself runs in the background; its outcome
/// arrives on the sink as `Opened` or `Error`.
pub trait Connector: Send + Sync {
    fn connect(&self, request: ConnectRequest, sink: TransportSink) -> Box<dyn TransportHandle>;
}

/// Write side of an open (or opening) connection.
pub trait TransportHandle: Send {
    /// Queue a frame. Fire-and-forget: delivery failures surface later as
    /// `Error`/`Closed` events.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TransportSend`] if the connection task is gone.
    fn send(&self, frame: String) -> Result<(), ChatError>;

    /// Best-effort close. Never fails.
    fn close(&mut self);
}
