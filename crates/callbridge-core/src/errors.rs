//! Error types for the callbridge harness
//!
//! Every failure a test procedure can observe is a `HarnessError`. None of
//! them are retried internally: a timeout or a dropped connection fails the
//! current procedure and the caller decides whether to re-run.

use std::fmt;
use std::time::Duration;

use crate::state::{ConnectionState, ResultCode};

// ----------------------------------------------------------------------------
// Timeout Classification
// ----------------------------------------------------------------------------

/// Which budget elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Waiting for the transport connection
    Connect,
    /// Waiting for the logon response
    Logon,
    /// Waiting for a procedure's expected callback
    Wait,
    /// Waiting for teardown to reach Disconnected
    Disconnect,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Connect => write!(f, "connecting"),
            TimeoutKind::Logon => write!(f, "logging on"),
            TimeoutKind::Wait => write!(f, "waiting"),
            TimeoutKind::Disconnect => write!(f, "disconnecting"),
        }
    }
}

// ----------------------------------------------------------------------------
// Harness Error
// ----------------------------------------------------------------------------

/// Core error type for the harness
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("Timed out {kind} for {awaited} after {elapsed:?}")]
    Timeout {
        kind: TimeoutKind,
        awaited: String,
        elapsed: Duration,
    },

    #[error("Session {current} whilst waiting for {awaited} (expected one of {})", format_states(.expected))]
    UnexpectedState {
        current: ConnectionState,
        expected: Vec<ConnectionState>,
        awaited: String,
    },

    #[error("Logon rejected for '{username}': {result}")]
    LogonRejected { username: String, result: ResultCode },

    #[error("Ordinal {ordinal} is already taken by '{existing}' (registering '{name}')")]
    DuplicateOrdinal {
        ordinal: u32,
        existing: String,
        name: String,
    },

    #[error("Fixture slot '{slot}' has already been written")]
    SlotAlreadyWritten { slot: &'static str },

    #[error("Fixture slot '{slot}' has not been written yet")]
    SlotEmpty { slot: &'static str },

    #[error("Fixture slot '{slot}' holds a value of another type")]
    SlotTypeMismatch { slot: &'static str },

    #[error("Client error: {reason}")]
    Client { reason: String },

    #[error("Assertion failed in '{procedure}': {reason}")]
    Assertion { procedure: String, reason: String },
}

impl HarnessError {
    pub fn configuration(reason: impl Into<String>) -> Self {
        HarnessError::Configuration {
            reason: reason.into(),
        }
    }

    pub fn client(reason: impl Into<String>) -> Self {
        HarnessError::Client {
            reason: reason.into(),
        }
    }

    pub fn assertion(procedure: impl Into<String>, reason: impl Into<String>) -> Self {
        HarnessError::Assertion {
            procedure: procedure.into(),
            reason: reason.into(),
        }
    }

    /// Build a timeout error naming what was awaited
    pub fn timeout(kind: TimeoutKind, awaited: impl Into<String>, elapsed: Duration) -> Self {
        HarnessError::Timeout {
            kind,
            awaited: awaited.into(),
            elapsed,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, HarnessError::Timeout { .. })
    }

    pub fn is_unexpected_state(&self) -> bool {
        matches!(self, HarnessError::UnexpectedState { .. })
    }
}

fn format_states(states: &[ConnectionState]) -> String {
    let names: Vec<&str> = states.iter().map(|s| s.name()).collect();
    format!("[{}]", names.join(", "))
}

pub type HarnessResult<T> = Result<T, HarnessError>;
