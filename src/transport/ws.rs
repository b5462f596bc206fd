//! WebSocket transport over tokio-tungstenite.
//!
//! One spawned task per connection: it performs the upgrade (bounded by the
//! connect timeout), reports `Opened`, then pumps outbound frames from the
//! handle and inbound text frames to the sink until either side closes.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{ConnectRequest, Connector, TransportEvent, TransportHandle, TransportSink};
use crate::error::ChatError;

enum Outbound {
    Text(String),
    Close,
}

// =============================================================================
// CONNECTOR
// =============================================================================

#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    fn connect(&self, request: ConnectRequest, sink: TransportSink) -> Box<dyn TransportHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_connection(request, self.connect_timeout, rx, sink));
        Box::new(WsHandle { outbound: tx })
    }
}

struct WsHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for WsHandle {
    fn send(&self, frame: String) -> Result<(), ChatError> {
        self.outbound
            .send(Outbound::Text(frame))
            .map_err(|_| ChatError::TransportSend("connection task has stopped".into()))
    }

    fn close(&mut self) {
        if self.outbound.send(Outbound::Close).is_err() {
            debug!("close on finished connection ignored");
        }
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

fn build_request(request: &ConnectRequest) -> Result<Request, ChatError> {
    let mut req = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ChatError::TransportOpen(e.to_string()))?;
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| ChatError::TransportOpen(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| ChatError::TransportOpen(e.to_string()))?;
        req.headers_mut().insert(name, value);
    }
    Ok(req)
}

async fn run_connection(
    request: ConnectRequest,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    sink: TransportSink,
) {
    let generation = sink.generation();
    let client_request = match build_request(&request) {
        Ok(r) => r,
        Err(e) => {
            warn!(generation, error = %e, "invalid websocket request");
            sink.emit(TransportEvent::Error(e.to_string()));
            return;
        }
    };

    let stream = match tokio::time::timeout(connect_timeout, connect_async(client_request)).await {
        Ok(Ok((stream, _response))) => stream,
        Ok(Err(e)) => {
            warn!(generation, error = %e, "websocket connect failed");
            sink.emit(TransportEvent::Error(ChatError::TransportOpen(e.to_string()).to_string()));
            return;
        }
        Err(_) => {
            warn!(generation, "websocket connect timed out");
            sink.emit(TransportEvent::Error(ChatError::TransportOpen("connect timed out".into()).to_string()));
            return;
        }
    };

    if !sink.emit(TransportEvent::Opened) {
        return;
    }
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(frame)) => {
                    if let Err(e) = write.send(Message::text(frame)).await {
                        warn!(generation, error = %e, "websocket send failed");
                        sink.emit(TransportEvent::Error(ChatError::TransportSend(e.to_string()).to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.close().await;
                    sink.emit(TransportEvent::Closed(None));
                    break;
                }
            },
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        sink.emit(TransportEvent::Message(text));
                    }
                    Err(_) => warn!(generation, len = bytes.len(), "non-utf8 binary frame dropped"),
                },
                Some(Ok(Message::Close(frame))) => {
                    sink.emit(TransportEvent::Closed(frame.map(|f| f.reason.as_str().to_owned())));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(generation, error = %e, "websocket read failed");
                    sink.emit(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    sink.emit(TransportEvent::Closed(None));
                    break;
                }
            },
        }
    }
    debug!(generation, "websocket task finished");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
