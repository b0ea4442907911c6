//! Callbridge Core
//!
//! Drives an asynchronous, callback-driven network client through ordered,
//! stateful test procedures. The [`EventBridge`] turns "wait until this
//! callback fires" into a timeout-bounded await that also fails fast when
//! the connection drops, and the [`orderer`] fixes the sequence in which
//! procedures that depend on each other's side effects run.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod bridge;
pub mod callbacks;
pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod fixture;
pub mod handlers;
pub mod orderer;
pub mod session;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod mock_client;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use bridge::{EventBridge, Expectation, WaitOutcome};
pub use callbacks::{CallbackManager, Subscription};
pub use client::ClientConnection;
pub use config::HarnessConfig;
pub use credentials::{LogonDetails, LogonSecret};
pub use errors::{HarnessError, HarnessResult, TimeoutKind};
pub use events::{
    create_event_channel, Callback, ClientEvent, Connected, Disconnected, EventKind,
    EventReceiver, EventSender, JobId, LoggedOff, LoggedOn, ServiceMessage,
};
pub use fixture::{FixtureState, Slot};
pub use orderer::{order, Ordered, ProcedureGroup, ProcedureOutcome, RunReport, SequentialRunner};
pub use session::Session;
pub use state::{ConnectionState, ResultCode};

#[doc(hidden)]
pub use tracing as __tracing;
