//! Graph application through a [`Provisioner`].
//!
//! Nodes are provisioned one at a time in topological order, each with its
//! references resolved against what earlier nodes reported. The first failure
//! aborts the whole apply. Deferred patches run after every node exists.

use serde::Serialize;
use serde_json::Value;
use shipyard_core::provisioner::{ProvisionedNode, Provisioner};
use shipyard_core::{Error, NodeId, Reference, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::graph::ResourceGraph;

/// Provisioned state of one node: what the engine reported plus the inputs it
/// was given.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeState {
    pub provisioned: ProvisionedNode,
    pub inputs: BTreeMap<String, Value>,
}

impl NodeState {
    /// Value of a referenced attribute: engine outputs first, then inputs,
    /// and the engine identifier for `id`.
    fn lookup(&self, reference: &Reference) -> Option<Value> {
        let (base, index) = reference.path();
        let value = self
            .provisioned
            .outputs
            .get(base)
            .or_else(|| self.inputs.get(base))
            .cloned()
            .or_else(|| (base == "id").then(|| Value::String(self.provisioned.identifier.clone())))?;
        match index {
            Some(i) => value.get(i).cloned(),
            None => Some(value),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    /// Node ids in the order they were provisioned.
    pub provisioned: Vec<NodeId>,
    /// `(node, attribute)` of every applied patch.
    pub patched: Vec<(NodeId, String)>,
    pub outputs: BTreeMap<String, Value>,
    pub state: BTreeMap<NodeId, NodeState>,
}

pub struct Applier {
    provisioner: Arc<dyn Provisioner>,
}

impl Applier {
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }

    pub async fn apply(&self, graph: &mut ResourceGraph) -> Result<ApplyReport> {
        let order = graph.topological_order()?;
        let mut report = ApplyReport::default();

        info!(
            graph = %graph.name(),
            nodes = order.len(),
            provisioner = self.provisioner.name(),
            "applying graph"
        );

        for id in order {
            let node = graph
                .node(&id)
                .cloned()
                .ok_or_else(|| Error::UnknownNode(id.to_string()))?;

            let mut inputs = BTreeMap::new();
            for (name, value) in &node.attributes {
                let resolved = value
                    .resolve(|r| report.state.get(&r.node).and_then(|s| s.lookup(r)))
                    .map_err(|r| {
                        Error::UnresolvedReference(format!("{}.{} -> {}", id, name, r.token()))
                    })?;
                inputs.insert(name.clone(), resolved);
            }

            let provisioned = match self.provisioner.provision(&node, &inputs).await {
                Ok(p) => p,
                Err(e) => {
                    error!(node = %id, error = %e, "provisioning failed, aborting apply");
                    return Err(Error::PartialGraphFailure {
                        node: id.to_string(),
                        message: e.to_string(),
                    });
                }
            };

            info!(node = %id, kind = %node.kind, identifier = %provisioned.identifier, "node provisioned");
            graph.mark_provisioned(&id)?;
            report.state.insert(
                id.clone(),
                NodeState {
                    provisioned,
                    inputs,
                },
            );
            report.provisioned.push(id);
        }

        let patches: Vec<_> = graph.patches().cloned().collect();
        for patch in patches {
            let value = patch
                .value
                .resolve(|r| report.state.get(&r.node).and_then(|s| s.lookup(r)))
                .map_err(|r| {
                    Error::UnresolvedReference(format!(
                        "patch {}.{} -> {}",
                        patch.target,
                        patch.attribute,
                        r.token()
                    ))
                })?;
            let node = graph
                .node(&patch.target)
                .cloned()
                .ok_or_else(|| Error::UnknownNode(patch.target.to_string()))?;

            if let Err(e) = self.provisioner.patch(&node, &patch.attribute, &value).await {
                error!(node = %patch.target, attribute = %patch.attribute, error = %e, "patch failed, aborting apply");
                return Err(Error::PartialGraphFailure {
                    node: patch.target.to_string(),
                    message: e.to_string(),
                });
            }

            info!(node = %patch.target, attribute = %patch.attribute, "patch applied");
            graph.apply_patch(&patch)?;
            if let Some(state) = report.state.get_mut(&patch.target) {
                state.inputs.insert(patch.attribute.clone(), value);
            }
            report.patched.push((patch.target, patch.attribute));
        }

        for (name, value) in graph.outputs() {
            let resolved = value
                .resolve(|r| report.state.get(&r.node).and_then(|s| s.lookup(r)))
                .map_err(|r| Error::UnresolvedReference(format!("output {} -> {}", name, r.token())))?;
            report.outputs.insert(name.clone(), resolved);
        }

        info!(
            provisioned = report.provisioned.len(),
            patched = report.patched.len(),
            "graph applied"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::simulated::SimulatedProvisioner;
    use shipyard_config::AppConfig;
    use shipyard_core::{AttrValue, Phase, ResourceKind};

    fn config() -> AppConfig {
        let mut config = AppConfig::new("app-name", "us-east-1");
        config.db.create_database = true;
        config.db.credentials.username = "admin".to_string();
        config.db.credentials.password = "hunter2".to_string();
        config.db.credentials.database_name = "app".to_string();
        config
    }

    #[tokio::test]
    async fn test_apply_full_stack() {
        let mut stack = GraphBuilder::new(&config()).build().unwrap();
        let provisioner = Arc::new(SimulatedProvisioner::new("us-east-1"));
        let report = Applier::new(provisioner.clone())
            .apply(&mut stack.graph)
            .await
            .unwrap();

        assert_eq!(report.provisioned.len(), stack.graph.len());
        assert_eq!(report.patched.len(), 3);
        assert!(stack.graph.nodes().all(|n| n.phase != Phase::Declared));
        assert_eq!(
            stack.graph.node(stack.filesystem.security_group.id()).unwrap().phase,
            Phase::Patched
        );

        assert_eq!(
            report.outputs["ecr-url"],
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/app-name"
        );
        assert!(report.outputs["alb-dns-name"]
            .as_str()
            .unwrap()
            .ends_with(".us-east-1.elb.amazonaws.com"));

        // Patched rules carry the engine identifiers of the admitted groups.
        let ecs_id = report.state[stack.compute.security_group.id()]
            .provisioned
            .identifier
            .clone();
        let efs_rules = &report.state[stack.filesystem.security_group.id()].inputs["ingress"];
        assert_eq!(efs_rules[0]["security_groups"][0], Value::String(ecs_id));

        // The real password reaches the engine; only rendering masks it.
        let cluster = &report.state[&NodeId::from("db-cluster")];
        assert_eq!(cluster.inputs["master_password"], "hunter2");

        assert_eq!(provisioner.patches().await.len(), 3);
    }

    #[tokio::test]
    async fn test_apply_aborts_on_first_failure() {
        let mut stack = GraphBuilder::new(&config()).build().unwrap();
        let provisioner = SimulatedProvisioner::new("us-east-1").fail_on("ecs-cluster");

        let err = Applier::new(Arc::new(provisioner))
            .apply(&mut stack.graph)
            .await
            .unwrap_err();
        match err {
            Error::PartialGraphFailure { node, .. } => assert_eq!(node, "ecs-cluster"),
            other => panic!("unexpected error: {other}"),
        }

        let cluster = stack.graph.get("ecs-cluster").unwrap();
        assert_eq!(cluster.phase, Phase::Declared);
        let service = stack.graph.get("ecs-service").unwrap();
        assert_eq!(service.phase, Phase::Declared);
        assert!(stack.graph.patches().all(|p| {
            stack.graph.node(&p.target).map(|n| n.phase) != Some(Phase::Patched)
        }));
    }

    #[tokio::test]
    async fn test_indexed_references_resolve() {
        let mut graph = ResourceGraph::new("test");
        let azs = graph
            .declare(ResourceKind::AvailabilityZones, "defaultAZs")
            .finish()
            .unwrap();
        graph
            .declare(ResourceKind::DefaultSubnet, "subnet2")
            .attr("availability_zone", azs.reference("names[1]"))
            .finish()
            .unwrap();
        graph
            .add_output("zone", AttrValue::concat([AttrValue::from("zone "), azs.reference("names[1]")]))
            .unwrap();

        let report = Applier::new(Arc::new(SimulatedProvisioner::new("eu-west-1")))
            .apply(&mut graph)
            .await
            .unwrap();
        assert_eq!(
            report.state[&NodeId::from("subnet2")].inputs["availability_zone"],
            "eu-west-1b"
        );
        assert_eq!(report.outputs["zone"], "zone eu-west-1b");
    }
}
