use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Heartbeat based failure detection timings (all in milliseconds)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MembershipConfig {
    /// How often the detector sweeps heartbeat timestamps
    #[serde(default = "default_heartbeat_interval_in_ms")]
    pub heartbeat_interval_in_ms: u64,

    /// Silence after which an ALIVE node becomes SUSPECTED
    #[serde(default = "default_suspect_timeout_in_ms")]
    pub suspect_timeout_in_ms: u64,

    /// Silence after which a node is declared DEAD
    #[serde(default = "default_dead_timeout_in_ms")]
    pub dead_timeout_in_ms: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_in_ms: default_heartbeat_interval_in_ms(),
            suspect_timeout_in_ms: default_suspect_timeout_in_ms(),
            dead_timeout_in_ms: default_dead_timeout_in_ms(),
        }
    }
}

impl MembershipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "heartbeat_interval_in_ms must be greater than 0".into(),
            )));
        }

        if self.suspect_timeout_in_ms <= self.heartbeat_interval_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "suspect_timeout_in_ms ({}) must exceed heartbeat_interval_in_ms ({})",
                self.suspect_timeout_in_ms, self.heartbeat_interval_in_ms
            ))));
        }

        if self.dead_timeout_in_ms <= self.suspect_timeout_in_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "dead_timeout_in_ms ({}) must exceed suspect_timeout_in_ms ({})",
                self.dead_timeout_in_ms, self.suspect_timeout_in_ms
            ))));
        }

        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_in_ms)
    }

    pub fn suspect_timeout(&self) -> Duration {
        Duration::from_millis(self.suspect_timeout_in_ms)
    }

    pub fn dead_timeout(&self) -> Duration {
        Duration::from_millis(self.dead_timeout_in_ms)
    }
}

fn default_heartbeat_interval_in_ms() -> u64 {
    100
}
fn default_suspect_timeout_in_ms() -> u64 {
    500
}
fn default_dead_timeout_in_ms() -> u64 {
    1500
}
