//! Simulated client
//!
//! Implements the client boundary against a [`SimulatedService`]. Every
//! primitive is fire-and-forget; the service schedules the answers on the
//! event channel returned alongside the client.

use callbridge_core::{ClientConnection, HarnessResult, LogonDetails, ServiceMessage};
use tracing::debug;

use crate::service::{ClientId, SimulatedService};

pub struct SimulatedClient {
    id: ClientId,
    service: SimulatedService,
}

impl SimulatedClient {
    pub(crate) fn new(id: ClientId, service: SimulatedService) -> Self {
        Self { id, service }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl ClientConnection for SimulatedClient {
    fn connect(&self) -> HarnessResult<()> {
        debug!("Client {:?} connecting", self.id);
        self.service.connect(self.id);
        Ok(())
    }

    fn disconnect(&self) -> HarnessResult<()> {
        debug!("Client {:?} disconnecting", self.id);
        self.service.disconnect(self.id);
        Ok(())
    }

    fn send(&self, message: ServiceMessage) -> HarnessResult<()> {
        self.service.handle(self.id, message);
        Ok(())
    }

    fn logon(&self, details: &LogonDetails) -> HarnessResult<()> {
        self.service.logon(self.id, details);
        Ok(())
    }

    fn logoff(&self) -> HarnessResult<()> {
        self.service.logoff(self.id);
        Ok(())
    }
}

impl Drop for SimulatedClient {
    fn drop(&mut self) {
        self.service.detach(self.id);
    }
}
