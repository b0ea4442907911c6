//! Callbridge Simulator
//!
//! In-memory lobby service standing in for the remote side, a client that
//! talks to it through the callbridge client boundary, and the built-in
//! ordered suites run against it.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod client;
pub mod config;
pub mod service;
pub mod suites;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use client::SimulatedClient;
pub use config::SimulationConfig;
pub use service::{ClientId, ServiceStats, SimulatedService};
pub use suites::{Identities, Suite, PRIMARY, SECONDARY};
