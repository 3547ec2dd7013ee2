use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// How the coordinator picks the single node that receives a dead node's units.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelection {
    /// Alive node hosting the fewest deployments, lowest id on ties
    #[default]
    LeastLoaded,
    /// Dead node id hashed over the sorted alive set
    Hashed,
}

/// Failover behaviour
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HaConfig {
    /// When disabled the coordinator ignores node failures entirely
    #[serde(default = "default_ha_enabled")]
    pub ha_enabled: bool,

    /// Upper bound on units a node accepts through explicit deploys.
    /// `0` means unlimited. Failover redeploys are exempt.
    #[serde(default = "default_max_units_per_node")]
    pub max_units_per_node: usize,

    /// Upper bound for one complete failover (milliseconds)
    #[serde(default = "default_failover_timeout_in_ms")]
    pub failover_timeout_in_ms: u64,

    /// Rounds one dead node's failover is driven before giving up. A round
    /// that leaves units behind is followed by another.
    #[serde(default = "default_failover_rounds")]
    pub failover_rounds: usize,

    #[serde(default)]
    pub target_selection: TargetSelection,

    /// Capacity of the failover-complete broadcast channel
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            ha_enabled: default_ha_enabled(),
            max_units_per_node: default_max_units_per_node(),
            failover_timeout_in_ms: default_failover_timeout_in_ms(),
            failover_rounds: default_failover_rounds(),
            target_selection: TargetSelection::default(),
            event_buffer_size: default_event_buffer_size(),
        }
    }
}

impl HaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.failover_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "failover_timeout_in_ms must be greater than 0".into(),
            )));
        }

        if self.failover_rounds == 0 {
            return Err(Error::Config(ConfigError::Message(
                "failover_rounds must be at least 1".into(),
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "event_buffer_size must be greater than 0".into(),
            )));
        }

        Ok(())
    }

    pub fn failover_timeout(&self) -> Duration {
        Duration::from_millis(self.failover_timeout_in_ms)
    }
}

fn default_ha_enabled() -> bool {
    true
}
fn default_max_units_per_node() -> usize {
    20
}
// in ms
fn default_failover_timeout_in_ms() -> u64 {
    10_000
}
fn default_failover_rounds() -> usize {
    3
}
fn default_event_buffer_size() -> usize {
    1024
}
