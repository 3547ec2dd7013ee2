use std::collections::HashSet;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::NodeId;
use crate::Result;

/// Identity of this coordinator and the nodes it joins on start-up.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    /// Identity used as owner when acquiring the failover lock
    ///
    /// Default: `default_member_id()` (1)
    #[serde(default = "default_member_id")]
    pub member_id: u32,

    /// Execution nodes registered as ALIVE when the cluster starts
    ///
    /// Default: empty, nodes join explicitly
    #[serde(default)]
    pub initial_nodes: Vec<NodeId>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            member_id: default_member_id(),
            initial_nodes: vec![],
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    /// # Errors
    /// Returns `Error::Config` if any configuration rules are violated
    pub fn validate(&self) -> Result<()> {
        if self.member_id == 0 {
            return Err(Error::Config(ConfigError::Message(
                "member_id cannot be 0 (reserved for invalid members)".into(),
            )));
        }

        let mut ids = HashSet::new();
        for node_id in &self.initial_nodes {
            if !ids.insert(node_id) {
                return Err(Error::Config(ConfigError::Message(format!(
                    "Duplicate node id {node_id} in initial_nodes"
                ))));
            }
        }

        Ok(())
    }
}

fn default_member_id() -> u32 {
    1
}
