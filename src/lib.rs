//! Streaming chat session client.
//!
//! A [`ChatSession`] keeps one persistent WebSocket to the chat backend,
//! reconnects with bounded exponential backoff, decodes the server's sentinel
//! stream protocol into incremental message updates, and falls back to a
//! one-shot HTTP request (replayed through a typing simulator) whenever the
//! socket cannot be used.
//!
//! ```text
//!  UI ──► ChatSession ──commands──► driver task ──► SessionCore (pure)
//!   ▲                                 │   ▲                │
//!   └──── SessionEvent / watch ◄──────┘   └── transport / http / timers
//! ```

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod typing;

pub use api::{ChatApi, HttpChatApi};
pub use config::SessionConfig;
pub use credentials::{CredentialStore, Credentials, MemoryCredentials};
pub use error::ChatError;
pub use lifecycle::{ConnectionSnapshot, ConnectionStatus, ReconnectPolicy};
pub use message::{ChatMessage, Role, StreamState};
pub use session::{ChatSession, SessionEvent, SessionView};
