//! Connection Lifecycle State Machine
//!
//! The session's state only moves in response to delivered events, along
//! the edges drawn below. An event with no edge out of the current state is
//! ignored. Teardown is the one move not driven by an event.
//! `Disconnected` has no outgoing edges.
//!
//! ```text
//! Connecting ─Connected─> Connected ─LoggedOn(Ok)─> LoggedOn ─LoggedOff─> LoggedOut
//!     │                       │                        │                     │
//!     │                       │        teardown ───────┴──> Disconnecting <──┘
//!     │                       │                                  │
//!     └───────────────────────┴────────Disconnected──────────────┴──> Disconnected
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::events::ClientEvent;

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Lifecycle state of one logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    LoggedOn,
    LoggedOut,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::LoggedOn => "LoggedOn",
            ConnectionState::LoggedOut => "LoggedOut",
            ConnectionState::Disconnecting => "Disconnecting",
            ConnectionState::Disconnected => "Disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Disconnected)
    }

    /// Apply a delivered event and return the resulting state.
    ///
    /// Domain events, rejected logons and events with no edge out of the
    /// current state leave it unchanged.
    pub fn on_event(self, event: &ClientEvent) -> ConnectionState {
        use ConnectionState::*;

        match (self, event) {
            (Disconnected, _) => Disconnected,
            (_, ClientEvent::Disconnected(_)) => Disconnected,
            (Connecting, ClientEvent::Connected(_)) => Connected,
            (Connected, ClientEvent::LoggedOn(logged_on)) if logged_on.result.is_ok() => LoggedOn,
            (LoggedOn, ClientEvent::LoggedOff(_)) => LoggedOut,
            (state, _) => state,
        }
    }

    /// Enter `Disconnecting` ahead of a logoff or disconnect request.
    ///
    /// Every state but `Disconnected` may start tearing down.
    pub fn begin_teardown(self) -> ConnectionState {
        match self {
            ConnectionState::Disconnected => ConnectionState::Disconnected,
            _ => ConnectionState::Disconnecting,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Result Codes
// ----------------------------------------------------------------------------

/// Result code carried by service responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    Ok,
    Fail,
    NoConnection,
    InvalidPassword,
    LoggedInElsewhere,
    AccessDenied,
    Timeout,
    Busy,
    NoMatch,
    ServiceUnavailable,
    InvalidParam,
    AccountLogonDenied,
    InvalidLoginAuthCode,
    RateLimitExceeded,
}

impl ResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
