//! Harness Configuration
//!
//! Timeouts and identifiers shared by every session of a run. Loaded with
//! figment in priority order: environment (`CALLBRIDGE_*`) > config file >
//! defaults.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::errors::{HarnessError, HarnessResult};

pub const DEFAULT_CONFIG_FILE: &str = "callbridge.toml";
pub const ENV_PREFIX: &str = "CALLBRIDGE_";

/// Run-wide harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// App announced as played after logon
    pub app_id: u32,
    /// Default budget for a procedure's wait
    pub handler_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub logon_timeout_ms: u64,
    pub disconnect_timeout_ms: u64,
    /// Fixed delay bridging causality between independent sessions
    pub peer_delay_ms: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            app_id: 570,
            handler_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            logon_timeout_ms: 5_000,
            disconnect_timeout_ms: 10_000,
            peer_delay_ms: 1_000,
        }
    }
}

impl HarnessConfig {
    /// Load from `callbridge.toml` in the working directory and the environment
    pub fn load() -> HarnessResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from an explicit file (missing files fall back to defaults)
    pub fn load_from<P: AsRef<Path>>(path: P) -> HarnessResult<Self> {
        let config: HarnessConfig = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| {
                HarnessError::configuration(format!(
                    "Failed to load configuration from {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Short timeouts for simulated runs
    pub fn testing() -> Self {
        Self {
            app_id: 250_820,
            handler_timeout_ms: 2_000,
            connect_timeout_ms: 1_000,
            logon_timeout_ms: 1_000,
            disconnect_timeout_ms: 2_000,
            peer_delay_ms: 50,
        }
    }

    pub fn validate(&self) -> HarnessResult<()> {
        let timeouts = [
            ("handler_timeout_ms", self.handler_timeout_ms),
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("logon_timeout_ms", self.logon_timeout_ms),
            ("disconnect_timeout_ms", self.disconnect_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(HarnessError::configuration(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn logon_timeout(&self) -> Duration {
        Duration::from_millis(self.logon_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn peer_delay(&self) -> Duration {
        Duration::from_millis(self.peer_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_budgets() {
        let config = HarnessConfig::default();
        assert_eq!(config.app_id, 570);
        assert_eq!(config.handler_timeout(), Duration::from_secs(10));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.logon_timeout(), Duration::from_secs(5));
        assert_eq!(config.disconnect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_layered_loading() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "callbridge.toml",
                r#"
                    app_id = 250820
                    logon_timeout_ms = 7000
                "#,
            )?;
            jail.set_env("CALLBRIDGE_LOGON_TIMEOUT_MS", "8000");

            let config = HarnessConfig::load().unwrap();
            assert_eq!(config.app_id, 250_820);
            assert_eq!(config.logon_timeout(), Duration::from_secs(8));
            assert_eq!(config.connect_timeout(), Duration::from_secs(5));
            Ok(())
        });
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("zero.toml", "connect_timeout_ms = 0")?;
            let error = HarnessConfig::load_from("zero.toml").unwrap_err();
            assert!(matches!(error, HarnessError::Configuration { .. }));
            Ok(())
        });
    }
}
