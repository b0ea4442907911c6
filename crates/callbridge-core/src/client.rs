//! Client boundary
//!
//! The network client is an external collaborator. The harness only needs
//! its fire-and-forget primitives; everything the client has to say comes
//! back as [`ClientEvent`](crate::ClientEvent)s on the event channel handed
//! to the session alongside it.

use crate::credentials::LogonDetails;
use crate::errors::HarnessResult;
use crate::events::ServiceMessage;

/// Fire-and-forget primitives of a callback-driven client.
///
/// None of these wait for an acknowledgement. An `Err` only means the request
/// could not be handed to the client at all.
pub trait ClientConnection: Send + Sync + 'static {
    /// Open the transport; success arrives as `Connected`
    fn connect(&self) -> HarnessResult<()>;

    /// Close the transport; completion arrives as `Disconnected`
    fn disconnect(&self) -> HarnessResult<()>;

    /// Submit a domain request
    fn send(&self, message: ServiceMessage) -> HarnessResult<()>;

    /// Authenticate; the response arrives as `LoggedOn`
    fn logon(&self, details: &LogonDetails) -> HarnessResult<()>;

    /// End the authenticated session; the service answers with `LoggedOff`
    /// followed by `Disconnected`
    fn logoff(&self) -> HarnessResult<()>;
}
