//! Deployment registry.
//!
//! Each node owns one registry worker that serializes every mutation of that
//! node's deployments, the same way a node's event loop would. Reads from other
//! nodes go through the worker and get back a copy. A dead node's worker is
//! frozen: it keeps answering snapshots but never mutates again.

mod deployment_index;
mod deployment_registry;
mod node_registry;
pub(crate) use deployment_index::*;
pub use deployment_registry::*;
pub(crate) use node_registry::*;


use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::NodeId;

/// Cluster-unique deployment identifier. Never reused, not preserved across
/// failover.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentId(String);

impl DeploymentId {
    pub(crate) fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeploymentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque unit configuration, compared by structural equality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitConfig(BTreeMap<String, String>);

impl UnitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UnitConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A unit running on a node. `node_id` is a non-owning back-reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub node_id: NodeId,
    pub unit_name: String,
    pub config: UnitConfig,
    pub ha: bool,
}

impl Deployment {
    /// The identity that survives failover
    pub fn unit_key(&self) -> UnitKey {
        UnitKey {
            unit_name: self.unit_name.clone(),
            config: self.config.clone(),
        }
    }
}

/// (unit name, configuration) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    pub unit_name: String,
    pub config: UnitConfig,
}

impl fmt::Display for UnitKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{:?}", self.unit_name, self.config.0)
    }
}

/// Point-in-time copy of one node's registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub node_id: NodeId,
    /// Set once the node died; the contents will never change again
    pub frozen: bool,
    pub deployments: Vec<Deployment>,
}

impl RegistrySnapshot {
    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    pub fn ha_deployments(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.iter().filter(|d| d.ha)
    }
}
