//! Handshake phase state machine.
//!
//! Tracks which phase of session negotiation a connection is in and rejects
//! out-of-order transitions. The handshake drivers in [`crate::handshake`]
//! advance through these states; the multiplexer runs entirely in
//! [`SessionState::Running`].

use crate::error::{Result, RfbError};
use std::fmt;

/// Phases of an RFB session from first byte to teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for the server's version string.
    AwaitVersion,
    /// Version received; waiting for the client's reply.
    AwaitVersionReply,
    /// Server is sending its security type list (or 3.3 scalar).
    SecurityList,
    /// Client is picking a security type.
    SecurityChoice,
    /// Type-specific subprotocol (e.g. the VNC challenge) in flight.
    SecurityExchange,
    /// Waiting for the SecurityResult word.
    SecurityResult,
    /// Client is sending its shared flag.
    ClientInit,
    /// Server is sending framebuffer parameters.
    ServerInit,
    /// Normal operation: multiplexed message exchange.
    Running,
    /// Connection torn down; terminal.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitVersion => "AwaitVersion",
            Self::AwaitVersionReply => "AwaitVersionReply",
            Self::SecurityList => "SecurityList",
            Self::SecurityChoice => "SecurityChoice",
            Self::SecurityExchange => "SecurityExchange",
            Self::SecurityResult => "SecurityResult",
            Self::ClientInit => "ClientInit",
            Self::ServerInit => "ServerInit",
            Self::Running => "Running",
            Self::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

impl SessionState {
    /// The next state in the forward handshake progression.
    fn successor(&self) -> Option<SessionState> {
        match self {
            Self::AwaitVersion => Some(Self::AwaitVersionReply),
            Self::AwaitVersionReply => Some(Self::SecurityList),
            Self::SecurityList => Some(Self::SecurityChoice),
            Self::SecurityChoice => Some(Self::SecurityExchange),
            Self::SecurityExchange => Some(Self::SecurityResult),
            Self::SecurityResult => Some(Self::ClientInit),
            Self::ClientInit => Some(Self::ServerInit),
            Self::ServerInit => Some(Self::Running),
            Self::Running | Self::Terminated => None,
        }
    }
}

/// Tracks the current phase and validates transitions.
#[derive(Debug, Clone)]
pub struct SessionPhase {
    state: SessionState,
}

impl Default for SessionPhase {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionPhase {
    /// Start a fresh session at [`SessionState::AwaitVersion`].
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitVersion,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session reached normal operation.
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Move to the next state.
    ///
    /// Valid moves are the single forward progression, staying in `Running`,
    /// and terminating from anywhere. `Terminated` is final.
    pub fn transition_to(&mut self, next: SessionState) -> Result<()> {
        let valid = match (self.state, next) {
            (SessionState::Terminated, _) => false,
            (_, SessionState::Terminated) => true,
            (SessionState::Running, SessionState::Running) => true,
            (from, to) => from.successor() == Some(to),
        };
        if !valid {
            return Err(RfbError::protocol(format!(
                "invalid session transition {} -> {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Advance one step along the forward progression.
    pub fn advance(&mut self) -> Result<SessionState> {
        let next = self.state.successor().ok_or_else(|| {
            RfbError::protocol(format!("no forward transition from {}", self.state))
        })?;
        self.state = next;
        Ok(next)
    }
}
