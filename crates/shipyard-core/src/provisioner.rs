//! Provisioner trait.
//!
//! A provisioner reconciles one resource node at a time against real
//! infrastructure. The graph applier drives it in dependency order and feeds
//! each node's inputs with references already resolved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::Result;
use crate::resource::ResourceNode;

/// What a provisioner reports back for a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedNode {
    /// Engine-generated identifier (the node's `id` attribute).
    pub identifier: String,
    /// Generated attributes other nodes may reference (`arn`, `dns_name`, ...).
    pub outputs: BTreeMap<String, Value>,
}

/// Trait for provisioning engines.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of this provisioner.
    fn name(&self) -> &'static str;

    /// Create or update a node from its resolved inputs.
    async fn provision(
        &self,
        node: &ResourceNode,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<ProvisionedNode>;

    /// Replace one attribute of an already provisioned node.
    async fn patch(&self, node: &ResourceNode, attribute: &str, value: &Value) -> Result<()>;
}
