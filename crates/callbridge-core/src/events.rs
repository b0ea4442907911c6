//! Event catalog delivered by the client
//!
//! Events are tagged by [`EventKind`]. The four lifecycle kinds drive the
//! session state machine; everything else arrives as a [`ServiceMessage`]
//! whose kind is a static string and whose body is JSON.
//!
//! Procedures never match on `ClientEvent` directly. They name a payload type
//! implementing [`Callback`], and the dispatch table routes matching events to
//! them.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::ResultCode;

// ----------------------------------------------------------------------------
// Event Channel
// ----------------------------------------------------------------------------

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// ----------------------------------------------------------------------------
// Event Kinds
// ----------------------------------------------------------------------------

/// Dispatch tag for delivered events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    LoggedOn,
    LoggedOff,
    Service(&'static str),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Connected => write!(f, "Connected"),
            EventKind::Disconnected => write!(f, "Disconnected"),
            EventKind::LoggedOn => write!(f, "LoggedOn"),
            EventKind::LoggedOff => write!(f, "LoggedOff"),
            EventKind::Service(kind) => write!(f, "{}", kind),
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle Payloads
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connected;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected {
    /// Whether the local side asked for the disconnect
    pub user_initiated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedOn {
    pub result: ResultCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedOff {
    pub result: ResultCode,
}

// ----------------------------------------------------------------------------
// Service Messages
// ----------------------------------------------------------------------------

/// Correlates a request with its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Domain request or response exchanged with the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub kind: String,
    pub job_id: JobId,
    pub body: serde_json::Value,
}

impl ServiceMessage {
    pub fn new(kind: impl Into<String>, job_id: JobId, body: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            job_id,
            body,
        }
    }

    /// Build a message from a serializable body
    pub fn encode<T: Serialize>(
        kind: impl Into<String>,
        job_id: JobId,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(kind, job_id, serde_json::to_value(body)?))
    }

    /// Decode the body into a typed payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }
}

// ----------------------------------------------------------------------------
// Client Events
// ----------------------------------------------------------------------------

/// Event delivered by the client's dispatch loop
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected(Connected),
    Disconnected(Disconnected),
    LoggedOn(LoggedOn),
    LoggedOff(LoggedOff),
    Service(ServiceMessage),
}

impl ClientEvent {
    /// Abnormal disconnect, as seen when the remote side drops the session
    pub fn dropped() -> Self {
        ClientEvent::Disconnected(Disconnected {
            user_initiated: false,
        })
    }

    pub fn service(kind: impl Into<String>, job_id: JobId, body: serde_json::Value) -> Self {
        ClientEvent::Service(ServiceMessage::new(kind, job_id, body))
    }

    /// Tag used for listener lookup
    pub fn matches(&self, kind: &EventKind) -> bool {
        match (self, kind) {
            (ClientEvent::Connected(_), EventKind::Connected) => true,
            (ClientEvent::Disconnected(_), EventKind::Disconnected) => true,
            (ClientEvent::LoggedOn(_), EventKind::LoggedOn) => true,
            (ClientEvent::LoggedOff(_), EventKind::LoggedOff) => true,
            (ClientEvent::Service(message), EventKind::Service(name)) => message.kind == *name,
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            ClientEvent::Connected(_) => "Connected",
            ClientEvent::Disconnected(_) => "Disconnected",
            ClientEvent::LoggedOn(_) => "LoggedOn",
            ClientEvent::LoggedOff(_) => "LoggedOff",
            ClientEvent::Service(message) => &message.kind,
        }
    }
}

// ----------------------------------------------------------------------------
// Typed Callbacks
// ----------------------------------------------------------------------------

/// Typed payload that a procedure can wait for
pub trait Callback: Clone + Send + 'static {
    fn kind() -> EventKind;

    /// Extract the payload, `None` if the event is not of this type
    fn from_event(event: &ClientEvent) -> Option<Self>;
}

impl Callback for Connected {
    fn kind() -> EventKind {
        EventKind::Connected
    }

    fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::Connected(payload) => Some(*payload),
            _ => None,
        }
    }
}

impl Callback for Disconnected {
    fn kind() -> EventKind {
        EventKind::Disconnected
    }

    fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::Disconnected(payload) => Some(*payload),
            _ => None,
        }
    }
}

impl Callback for LoggedOn {
    fn kind() -> EventKind {
        EventKind::LoggedOn
    }

    fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::LoggedOn(payload) => Some(*payload),
            _ => None,
        }
    }
}

impl Callback for LoggedOff {
    fn kind() -> EventKind {
        EventKind::LoggedOff
    }

    fn from_event(event: &ClientEvent) -> Option<Self> {
        match event {
            ClientEvent::LoggedOff(payload) => Some(*payload),
            _ => None,
        }
    }
}

/// Implement [`Callback`] for a deserializable response body carried in a
/// service message of the given kind.
#[macro_export]
macro_rules! service_callback {
    ($payload:ty, $kind:expr) => {
        impl $crate::Callback for $payload {
            fn kind() -> $crate::EventKind {
                $crate::EventKind::Service($kind)
            }

            fn from_event(event: &$crate::ClientEvent) -> Option<Self> {
                match event {
                    $crate::ClientEvent::Service(message) if message.kind == $kind => {
                        match message.decode::<$payload>() {
                            Ok(payload) => Some(payload),
                            Err(e) => {
                                $crate::__tracing::warn!(
                                    "Dropping malformed '{}' body for {}: {}",
                                    $kind,
                                    message.job_id,
                                    e
                                );
                                None
                            }
                        }
                    }
                    _ => None,
                }
            }
        }
    };
}
