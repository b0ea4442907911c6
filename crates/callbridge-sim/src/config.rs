//! Simulation Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behavior of the simulated service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Delivery latency range (min, max) in milliseconds
    pub latency_range: (u64, u64),
    /// Seed for latency sampling
    pub seed: u64,
    /// Drop a session that lists lobbies this soon after another account
    /// deleted one of the same app. Reproduces the remote service's
    /// behavior when a read races a peer's deletion.
    pub drop_after_peer_delete_ms: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_range: (5, 25),
            seed: 0x5eed,
            drop_after_peer_delete_ms: None,
        }
    }
}

impl SimulationConfig {
    /// Near-instant, deterministic delivery
    pub fn ideal() -> Self {
        Self {
            latency_range: (1, 1),
            ..Self::default()
        }
    }

    /// Slow delivery, still well inside the testing budgets
    pub fn high_latency() -> Self {
        Self {
            latency_range: (100, 400),
            ..Self::default()
        }
    }

    /// Default latency plus the peer-deletion race
    pub fn racy() -> Self {
        Self {
            drop_after_peer_delete_ms: Some(500),
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn peer_delete_window(&self) -> Option<Duration> {
        self.drop_after_peer_delete_ms.map(Duration::from_millis)
    }

    pub(crate) fn sample_latency(&self, rng: &mut fastrand::Rng) -> Duration {
        let (min, max) = self.latency_range;
        let millis = if max > min { rng.u64(min..=max) } else { min };
        Duration::from_millis(millis)
    }
}
