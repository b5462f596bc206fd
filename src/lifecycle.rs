//! Connection lifecycle state machine.
//!
//! DESIGN
//! ======
//! `ConnectionSession` is pure state. Every transition returns the list of
//! [`LifecycleAction`]s the driver must perform (open a transport, arm a
//! timer, send the handshake); it never performs I/O itself. Transitions check
//! the current status before acting, because transport callbacks, timers and
//! user calls can arrive in any order.
//!
//! LIFECYCLE
//! =========
//! `Idle -> Connecting -> Open -> Closed`, with `Closed -> Connecting` through
//! a scheduled reconnect. The n-th consecutive reconnect waits
//! `min(base * 2^n, max)`; once `max_attempts` reconnects have been scheduled
//! the next failure marks the session unavailable until a manual reconnect.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_MANUAL_RECONNECT_DELAY_MS: u64 = 1000;

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Observable view of the connection, published after every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub reconnect_attempt: u32,
    /// Reconnects are exhausted; only a manual reconnect restarts the loop.
    pub unavailable: bool,
    /// `None` until the server answers the handshake.
    pub authenticated: Option<bool>,
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Settle time between a manual close and the fresh connect.
    pub manual_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            manual_delay: Duration::from_millis(DEFAULT_MANUAL_RECONNECT_DELAY_MS),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the reconnect with zero-based index `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.max_delay)
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// Side effect requested by a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    OpenTransport,
    /// Best-effort close of the current transport.
    CloseTransport,
    /// Build and send the auth handshake.
    SendAuth,
    /// Arm (or re-arm) the reconnect timer.
    ScheduleReconnect(Duration),
    CancelReconnect,
    /// Reconnects are used up.
    Exhausted { attempts: u32 },
}

// =============================================================================
// CONNECTION SESSION
// =============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionSession {
    status: ConnectionStatus,
    reconnect_attempt: u32,
    policy: ReconnectPolicy,
    reconnect_pending: bool,
    unavailable: bool,
    authenticated: Option<bool>,
    disposed: bool,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Idle,
            reconnect_attempt: 0,
            policy,
            reconnect_pending: false,
            unavailable: false,
            authenticated: None,
            disposed: false,
        }
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.reconnect_attempt
    }

    #[must_use]
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Open and not rejected by the server: live sends may go out.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.disposed && self.status == ConnectionStatus::Open && self.authenticated != Some(false)
    }

    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            status: self.status,
            reconnect_attempt: self.reconnect_attempt,
            unavailable: self.unavailable,
            authenticated: self.authenticated,
        }
    }

    /// Start connecting. A no-op while already connecting or open.
    pub fn connect(&mut self) -> Vec<LifecycleAction> {
        if self.disposed {
            debug!("connect ignored: session disposed");
            return Vec::new();
        }
        match self.status {
            ConnectionStatus::Connecting | ConnectionStatus::Open => {
                debug!(status = ?self.status, "connect ignored: already in progress");
                Vec::new()
            }
            ConnectionStatus::Idle | ConnectionStatus::Closed => {
                let mut actions = Vec::new();
                if self.reconnect_pending {
                    self.reconnect_pending = false;
                    actions.push(LifecycleAction::CancelReconnect);
                }
                self.status = ConnectionStatus::Connecting;
                self.authenticated = None;
                info!(attempt = self.reconnect_attempt, "chat socket connecting");
                actions.push(LifecycleAction::OpenTransport);
                actions
            }
        }
    }

    /// The transport reported open.
    pub fn on_open(&mut self) -> Vec<LifecycleAction> {
        if self.disposed || self.status != ConnectionStatus::Connecting {
            warn!(status = ?self.status, "unexpected transport open ignored");
            return Vec::new();
        }
        self.status = ConnectionStatus::Open;
        self.reconnect_attempt = 0;
        self.reconnect_pending = false;
        self.unavailable = false;
        info!("chat socket open");
        vec![LifecycleAction::CancelReconnect, LifecycleAction::SendAuth]
    }

    /// The transport reported close or error. Close and error often arrive as
    /// a pair; only the first one schedules anything.
    pub fn on_down(&mut self, reason: &str) -> Vec<LifecycleAction> {
        if self.disposed {
            return Vec::new();
        }
        if matches!(self.status, ConnectionStatus::Idle | ConnectionStatus::Closed) {
            debug!(reason, "transport down while not connected; ignored");
            return Vec::new();
        }
        self.status = ConnectionStatus::Closed;
        self.authenticated = None;

        if self.reconnect_attempt < self.policy.max_attempts {
            let delay = self.policy.delay_for(self.reconnect_attempt);
            self.reconnect_attempt += 1;
            self.reconnect_pending = true;
            info!(
                reason,
                attempt = self.reconnect_attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "chat socket closed; reconnect scheduled"
            );
            vec![LifecycleAction::ScheduleReconnect(delay)]
        } else {
            self.unavailable = true;
            self.reconnect_pending = false;
            warn!(reason, attempts = self.reconnect_attempt, "chat socket reconnects exhausted");
            vec![LifecycleAction::Exhausted { attempts: self.reconnect_attempt }]
        }
    }

    /// The reconnect timer fired.
    pub fn on_reconnect_due(&mut self) -> Vec<LifecycleAction> {
        if self.disposed || !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.connect()
    }

    /// Record the server's answer to the handshake.
    ///
    /// A rejection is terminal for the connection: the transport is closed,
    /// no reconnect is scheduled and the session stays unavailable until a
    /// manual reconnect.
    pub fn on_auth_result(&mut self, accepted: bool) -> Vec<LifecycleAction> {
        if self.disposed || self.status != ConnectionStatus::Open {
            debug!(accepted, status = ?self.status, "auth result outside open connection ignored");
            return Vec::new();
        }
        self.authenticated = Some(accepted);
        if accepted {
            info!("chat socket authenticated");
            return Vec::new();
        }
        self.status = ConnectionStatus::Closed;
        self.unavailable = true;
        self.reconnect_pending = false;
        warn!("chat socket authentication rejected; connection closed");
        vec![LifecycleAction::CancelReconnect, LifecycleAction::CloseTransport]
    }

    /// Force-close, reset the attempt counter and reconnect after the settle
    /// delay.
    pub fn manual_reconnect(&mut self) -> Vec<LifecycleAction> {
        if self.disposed {
            return Vec::new();
        }
        self.status = ConnectionStatus::Closed;
        self.authenticated = None;
        self.reconnect_attempt = 0;
        self.unavailable = false;
        self.reconnect_pending = true;
        info!("manual reconnect requested");
        vec![
            LifecycleAction::CloseTransport,
            LifecycleAction::ScheduleReconnect(self.policy.manual_delay),
        ]
    }

    /// Tear down for good: close the transport and drop any pending timer.
    pub fn dispose(&mut self) -> Vec<LifecycleAction> {
        if self.disposed {
            return Vec::new();
        }
        self.disposed = true;
        self.status = ConnectionStatus::Closed;
        self.reconnect_pending = false;
        vec![LifecycleAction::CancelReconnect, LifecycleAction::CloseTransport]
    }
}

#[cfg(test)]
#[path = "lifecycle_test.rs"]
mod tests;
