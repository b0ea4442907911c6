//! Scripted client for tests
//!
//! Records every primitive it is asked to perform and answers with scripted
//! events, either immediately or after a delay. Events can also be injected
//! directly to simulate unsolicited deliveries such as a dropped connection.

use std::time::Duration;

use parking_lot::Mutex;

use crate::client::ClientConnection;
use crate::credentials::LogonDetails;
use crate::errors::{HarnessError, HarnessResult};
use crate::events::{
    create_event_channel, ClientEvent, Connected, Disconnected, EventReceiver, EventSender,
    LoggedOff, LoggedOn, ServiceMessage,
};
use crate::state::ResultCode;

/// Primitive invoked on the mock
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    Connect,
    Disconnect,
    Send(ServiceMessage),
    Logon { username: String },
    Logoff,
}

/// Which primitive a scripted reaction answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Connect,
    Disconnect,
    Send,
    Logon,
    Logoff,
}

impl ClientCall {
    pub fn kind(&self) -> CallKind {
        match self {
            ClientCall::Connect => CallKind::Connect,
            ClientCall::Disconnect => CallKind::Disconnect,
            ClientCall::Send(_) => CallKind::Send,
            ClientCall::Logon { .. } => CallKind::Logon,
            ClientCall::Logoff => CallKind::Logoff,
        }
    }
}

#[derive(Debug, Clone)]
struct Reaction {
    call: CallKind,
    delay: Duration,
    event: ClientEvent,
}

/// Mock implementation of [`ClientConnection`]
pub struct MockClient {
    events: EventSender,
    calls: Mutex<Vec<ClientCall>>,
    reactions: Mutex<Vec<Reaction>>,
}

impl MockClient {
    /// Silent mock: records calls, emits nothing until scripted
    pub fn new() -> (Self, EventReceiver) {
        let (events, receiver) = create_event_channel();
        let client = Self {
            events,
            calls: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
        };
        (client, receiver)
    }

    /// Mock that answers the lifecycle primitives like a healthy service
    pub fn cooperative() -> (Self, EventReceiver) {
        let (client, receiver) = Self::new();
        client.react(CallKind::Connect, ClientEvent::Connected(Connected));
        client.react(
            CallKind::Logon,
            ClientEvent::LoggedOn(LoggedOn {
                result: ResultCode::Ok,
            }),
        );
        client.react(
            CallKind::Logoff,
            ClientEvent::LoggedOff(LoggedOff {
                result: ResultCode::Ok,
            }),
        );
        client.react(
            CallKind::Logoff,
            ClientEvent::Disconnected(Disconnected {
                user_initiated: true,
            }),
        );
        client.react(
            CallKind::Disconnect,
            ClientEvent::Disconnected(Disconnected {
                user_initiated: true,
            }),
        );
        (client, receiver)
    }

    /// Answer `call` with `event` immediately
    pub fn react(&self, call: CallKind, event: ClientEvent) {
        self.react_after(call, Duration::ZERO, event);
    }

    /// Answer `call` with `event` after `delay`
    pub fn react_after(&self, call: CallKind, delay: Duration, event: ClientEvent) {
        self.reactions.lock().push(Reaction { call, delay, event });
    }

    /// Drop every scripted answer to `call`
    pub fn silence(&self, call: CallKind) {
        self.reactions.lock().retain(|reaction| reaction.call != call);
    }

    /// Sender for unsolicited events
    pub fn injector(&self) -> EventSender {
        self.events.clone()
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: CallKind) -> usize {
        self.calls.lock().iter().filter(|c| c.kind() == call).count()
    }

    fn record(&self, call: ClientCall) -> HarnessResult<()> {
        let kind = call.kind();
        self.calls.lock().push(call);

        let reactions: Vec<Reaction> = self
            .reactions
            .lock()
            .iter()
            .filter(|reaction| reaction.call == kind)
            .cloned()
            .collect();

        for reaction in reactions {
            if reaction.delay.is_zero() {
                self.events
                    .send(reaction.event)
                    .map_err(|_| HarnessError::client("event channel closed"))?;
            } else {
                let events = self.events.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(reaction.delay).await;
                    let _ = events.send(reaction.event);
                });
            }
        }
        Ok(())
    }
}

impl ClientConnection for MockClient {
    fn connect(&self) -> HarnessResult<()> {
        self.record(ClientCall::Connect)
    }

    fn disconnect(&self) -> HarnessResult<()> {
        self.record(ClientCall::Disconnect)
    }

    fn send(&self, message: ServiceMessage) -> HarnessResult<()> {
        self.record(ClientCall::Send(message))
    }

    fn logon(&self, details: &LogonDetails) -> HarnessResult<()> {
        self.record(ClientCall::Logon {
            username: details.username().to_string(),
        })
    }

    fn logoff(&self) -> HarnessResult<()> {
        self.record(ClientCall::Logoff)
    }
}
