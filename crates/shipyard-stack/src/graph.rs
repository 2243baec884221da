//! The resource graph.
//!
//! Nodes are declared through [`ResourceGraph::declare`]. A node may only
//! reference nodes that are already in the graph, so insertion order is
//! always a valid provisioning order. Reference cycles between resources are
//! broken with deferred [`Patch`]es, which are resolved after every node
//! exists and do not count as hard dependencies.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use shipyard_core::{
    AttrValue, Error, NodeHandle, NodeId, Patch, ResourceKind, ResourceNode, Result,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    name: String,
    nodes: Vec<ResourceNode>,
    index: BTreeMap<NodeId, usize>,
    patches: BTreeMap<(NodeId, String), Patch>,
    outputs: BTreeMap<String, AttrValue>,
}

impl ResourceGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start declaring a node. Nothing is added until [`NodeBuilder::finish`].
    pub fn declare(&mut self, kind: ResourceKind, id: impl Into<NodeId>) -> NodeBuilder<'_> {
        NodeBuilder {
            graph: self,
            node: ResourceNode::new(kind, id),
        }
    }

    /// Add a fully formed node without checking its references.
    ///
    /// Meant for graphs assembled by hand; run [`ResourceGraph::validate`]
    /// afterwards.
    pub fn insert(&mut self, mut node: ResourceNode) -> Result<NodeHandle> {
        if self.index.contains_key(&node.id) {
            return Err(Error::DuplicateNode(node.id.to_string()));
        }
        let referenced = node.referenced_nodes();
        node.depends_on.extend(referenced);
        let handle = node.handle();
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(handle)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Look up a node by its string id.
    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.node(&NodeId::from(id))
    }

    pub fn handle(&self, id: &NodeId) -> Result<NodeHandle> {
        self.node(id)
            .map(ResourceNode::handle)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.iter()
    }

    pub fn nodes_of_kind(&self, kind: ResourceKind) -> Vec<&ResourceNode> {
        self.nodes.iter().filter(|n| n.kind == kind).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Register a deferred replace-all update. A later registration for the
    /// same node and attribute replaces the earlier one.
    pub fn register_patch(&mut self, patch: Patch) -> Result<()> {
        if !self.contains(&patch.target) {
            return Err(Error::UnknownNode(patch.target.to_string()));
        }
        if let Some(missing) = patch.references().into_iter().find(|r| !self.contains(r)) {
            return Err(Error::UnresolvedReference(format!(
                "patch of {}.{} references unknown node {}",
                patch.target, patch.attribute, missing
            )));
        }
        debug!(node = %patch.target, attribute = %patch.attribute, "registered patch");
        self.patches
            .insert((patch.target.clone(), patch.attribute.clone()), patch);
        Ok(())
    }

    /// Patches ordered by target node and attribute.
    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    pub fn patch_for(&self, target: &NodeId, attribute: &str) -> Option<&Patch> {
        self.patches.get(&(target.clone(), attribute.to_string()))
    }

    /// Add a named graph-level output.
    pub fn add_output(&mut self, name: impl Into<String>, value: AttrValue) -> Result<()> {
        let name = name.into();
        if self.outputs.contains_key(&name) {
            return Err(Error::InvalidInput(format!("duplicate output {}", name)));
        }
        if let Some(missing) = value.references().into_iter().find(|r| !self.contains(r)) {
            return Err(Error::UnresolvedReference(format!(
                "output {} references unknown node {}",
                name, missing
            )));
        }
        self.outputs.insert(name, value);
        Ok(())
    }

    pub fn outputs(&self) -> &BTreeMap<String, AttrValue> {
        &self.outputs
    }

    pub(crate) fn mark_provisioned(&mut self, id: &NodeId) -> Result<()> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| Error::UnknownNode(id.to_string()))?;
        self.nodes[i].mark_provisioned();
        Ok(())
    }

    pub(crate) fn apply_patch(&mut self, patch: &Patch) -> Result<()> {
        let i = *self
            .index
            .get(&patch.target)
            .ok_or_else(|| Error::UnknownNode(patch.target.to_string()))?;
        self.nodes[i].apply_patch(patch);
        Ok(())
    }

    /// Provisioning order by Kahn's algorithm. Ties are broken by node id,
    /// so the order is deterministic.
    pub fn topological_order(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: BTreeMap<&NodeId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&NodeId, Vec<&NodeId>> = BTreeMap::new();

        for node in &self.nodes {
            in_degree.entry(&node.id).or_insert(0);
            for dep in &node.depends_on {
                if !self.contains(dep) {
                    return Err(Error::UnresolvedReference(format!(
                        "{} depends on unknown node {}",
                        node.id, dep
                    )));
                }
                *in_degree.entry(&node.id).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(&node.id);
            }
        }

        let mut ready: BTreeSet<&NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.clone());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(Error::DependencyCycle(stuck.join(", ")));
        }

        Ok(order)
    }

    /// Check that every dependency and patch resolves and that the hard
    /// dependencies are acyclic.
    pub fn validate(&self) -> Result<()> {
        self.topological_order()?;
        for patch in self.patches.values() {
            if !self.contains(&patch.target) {
                return Err(Error::UnknownNode(patch.target.to_string()));
            }
            if let Some(missing) = patch.references().into_iter().find(|r| !self.contains(r)) {
                return Err(Error::UnresolvedReference(missing.to_string()));
            }
        }
        Ok(())
    }

    /// Nodes with every patch merged, i.e. what provisioning converges to.
    pub fn desired_state(&self) -> Vec<ResourceNode> {
        self.nodes
            .iter()
            .map(|node| {
                let mut node = node.clone();
                for ((target, _), patch) in &self.patches {
                    if *target == node.id {
                        node.apply_patch(patch);
                    }
                }
                node
            })
            .collect()
    }

    /// Canonical document form of the desired state.
    ///
    /// Providers, data sources and resources are grouped by type name and
    /// keyed by node id. Explicit dependencies that are not implied by an
    /// attribute reference are listed under `depends_on`.
    pub fn render(&self) -> Value {
        let mut providers: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        let mut data: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        let mut resources: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();

        for node in self.desired_state() {
            let mut body = Map::new();
            for (name, value) in &node.attributes {
                body.insert(name.clone(), value.render());
            }

            let implied = node.referenced_nodes();
            let explicit: Vec<Value> = node
                .depends_on
                .iter()
                .filter(|dep| !implied.contains(*dep))
                .filter_map(|dep| self.node(dep))
                .filter(|dep| !dep.kind.is_provider())
                .map(|dep| Value::String(dep.kind.address(&dep.id)))
                .collect();
            if !explicit.is_empty() {
                body.insert("depends_on".to_string(), Value::Array(explicit));
            }

            let type_name = node.kind.type_name();
            if node.kind.is_provider() {
                providers.entry(type_name).or_default().push(Value::Object(body));
            } else if node.kind.is_data_source() {
                data.entry(type_name)
                    .or_default()
                    .insert(node.id.to_string(), Value::Object(body));
            } else {
                resources
                    .entry(type_name)
                    .or_default()
                    .insert(node.id.to_string(), Value::Object(body));
            }
        }

        let outputs: Map<String, Value> = self
            .outputs
            .iter()
            .map(|(name, value)| (name.clone(), json!({ "value": value.render() })))
            .collect();

        json!({
            "provider": providers,
            "data": data,
            "resource": resources,
            "output": outputs,
        })
    }

    /// SHA-256 of the canonical rendering, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.render().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Serialize for ResourceGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.render().serialize(serializer)
    }
}

/// Builder for one node. See [`ResourceGraph::declare`].
pub struct NodeBuilder<'g> {
    graph: &'g mut ResourceGraph,
    node: ResourceNode,
}

impl NodeBuilder<'_> {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.node.attributes.insert(name.into(), value.into());
        self
    }

    /// Explicit ordering dependency on a node the attributes do not reference.
    pub fn depends_on(mut self, handle: &NodeHandle) -> Self {
        self.node.depends_on.insert(handle.id().clone());
        self
    }

    pub fn depends_on_all<'h>(mut self, handles: impl IntoIterator<Item = &'h NodeHandle>) -> Self {
        for handle in handles {
            self.node.depends_on.insert(handle.id().clone());
        }
        self
    }

    /// Add the node. Fails if the id is taken or if any dependency is not yet
    /// in the graph.
    pub fn finish(self) -> Result<NodeHandle> {
        let NodeBuilder { graph, mut node } = self;

        if graph.contains(&node.id) {
            return Err(Error::DuplicateNode(node.id.to_string()));
        }

        let referenced = node.referenced_nodes();
        node.depends_on.extend(referenced);
        if let Some(missing) = node.depends_on.iter().find(|dep| !graph.contains(dep)) {
            return Err(Error::DependencyCycle(format!(
                "{} requires {} before it exists",
                node.id, missing
            )));
        }

        debug!(node = %node.id, kind = %node.kind, deps = node.depends_on.len(), "declared node");
        let handle = node.handle();
        graph.index.insert(node.id.clone(), graph.nodes.len());
        graph.nodes.push(node);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sg(graph: &mut ResourceGraph, id: &str) -> NodeHandle {
        graph
            .declare(ResourceKind::SecurityGroup, id)
            .attr("name", id)
            .finish()
            .unwrap()
    }

    #[test]
    fn test_declare_records_reference_dependencies() {
        let mut graph = ResourceGraph::new("test");
        let vpc = graph.declare(ResourceKind::Vpc, "VPC").finish().unwrap();
        let group = graph
            .declare(ResourceKind::SecurityGroup, "alb-sg")
            .attr("vpc_id", vpc.id_ref())
            .finish()
            .unwrap();

        let node = graph.node(group.id()).unwrap();
        assert!(node.depends_on.contains(vpc.id()));
        assert_eq!(graph.topological_order().unwrap(), vec![vpc.id().clone(), group.id().clone()]);
    }

    #[test]
    fn test_duplicate_node_is_rejected() {
        let mut graph = ResourceGraph::new("test");
        sg(&mut graph, "ecs-sg");
        let result = graph.declare(ResourceKind::SecurityGroup, "ecs-sg").finish();
        assert!(matches!(result, Err(Error::DuplicateNode(_))));
    }

    #[test]
    fn test_reference_to_missing_node_is_a_cycle_error() {
        let mut graph = ResourceGraph::new("test");
        let later = NodeHandle::new(ResourceKind::SecurityGroup, "later".into());
        let result = graph
            .declare(ResourceKind::SecurityGroup, "early")
            .attr("peer", later.id_ref())
            .finish();
        assert!(matches!(result, Err(Error::DependencyCycle(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let mut graph = ResourceGraph::new("test");
        let me = NodeHandle::new(ResourceKind::SecurityGroup, "me".into());
        let result = graph
            .declare(ResourceKind::SecurityGroup, "me")
            .attr("peer", me.id_ref())
            .finish();
        assert!(matches!(result, Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_topological_order_detects_cycles_in_hand_built_graphs() {
        let mut graph = ResourceGraph::new("test");
        let a = NodeHandle::new(ResourceKind::SecurityGroup, "a".into());
        let b = NodeHandle::new(ResourceKind::SecurityGroup, "b".into());

        let mut node_a = ResourceNode::new(ResourceKind::SecurityGroup, "a");
        node_a.attributes.insert("peer".to_string(), b.id_ref());
        let mut node_b = ResourceNode::new(ResourceKind::SecurityGroup, "b");
        node_b.attributes.insert("peer".to_string(), a.id_ref());
        graph.insert(node_a).unwrap();
        graph.insert(node_b).unwrap();

        assert!(matches!(graph.validate(), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_validate_reports_dangling_dependency() {
        let mut graph = ResourceGraph::new("test");
        let ghost = NodeHandle::new(ResourceKind::Vpc, "ghost".into());
        let mut node = ResourceNode::new(ResourceKind::SecurityGroup, "sg");
        node.attributes.insert("vpc_id".to_string(), ghost.id_ref());
        graph.insert(node).unwrap();

        assert!(matches!(
            graph.validate(),
            Err(Error::UnresolvedReference(_))
        ));
    }

    #[test]
    fn test_kahn_order_is_sorted_among_ready_nodes() {
        let mut graph = ResourceGraph::new("test");
        sg(&mut graph, "zeta");
        sg(&mut graph, "alpha");
        let order: Vec<String> = graph
            .topological_order()
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(order, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_patches_are_not_hard_dependencies() {
        let mut graph = ResourceGraph::new("test");
        let efs = sg(&mut graph, "efs-data-sg");
        let ecs = sg(&mut graph, "ecs-sg");

        graph
            .register_patch(Patch {
                target: efs.id().clone(),
                attribute: "ingress".to_string(),
                value: AttrValue::list([ecs.id_ref()]),
            })
            .unwrap();

        assert!(graph.node(efs.id()).unwrap().depends_on.is_empty());
        let desired = graph.desired_state();
        assert_eq!(
            desired[0].attribute("ingress").unwrap(),
            &AttrValue::list([ecs.id_ref()])
        );
    }

    #[test]
    fn test_register_patch_replaces_previous() {
        let mut graph = ResourceGraph::new("test");
        let efs = sg(&mut graph, "efs-data-sg");
        for value in ["first", "second"] {
            graph
                .register_patch(Patch {
                    target: efs.id().clone(),
                    attribute: "ingress".to_string(),
                    value: AttrValue::list([value]),
                })
                .unwrap();
        }

        assert_eq!(graph.patches().count(), 1);
        assert_eq!(
            graph.patch_for(efs.id(), "ingress").unwrap().value,
            AttrValue::list(["second"])
        );
    }

    #[test]
    fn test_patch_of_unknown_node() {
        let mut graph = ResourceGraph::new("test");
        let result = graph.register_patch(Patch {
            target: "nope".into(),
            attribute: "ingress".to_string(),
            value: AttrValue::Null,
        });
        assert!(matches!(result, Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_render_groups_by_type_and_lists_explicit_dependencies() {
        let mut graph = ResourceGraph::new("test");
        let role = graph
            .declare(ResourceKind::IamRole, "role")
            .attr("name", "r")
            .finish()
            .unwrap();
        let azs = graph
            .declare(ResourceKind::AvailabilityZones, "defaultAZs")
            .finish()
            .unwrap();
        graph
            .declare(ResourceKind::EcsCluster, "ecs-cluster")
            .attr("zone", azs.reference("names[0]"))
            .depends_on(&role)
            .finish()
            .unwrap();
        graph.add_output("zone", azs.reference("names[0]")).unwrap();

        let doc = graph.render();
        assert_eq!(
            doc["resource"]["aws_ecs_cluster"]["ecs-cluster"]["depends_on"],
            json!(["aws_iam_role.role"])
        );
        assert_eq!(
            doc["resource"]["aws_ecs_cluster"]["ecs-cluster"]["zone"],
            "${data.aws_availability_zones.defaultAZs.names[0]}"
        );
        assert!(doc["data"]["aws_availability_zones"]["defaultAZs"].is_object());
        assert_eq!(
            doc["output"]["zone"]["value"],
            "${data.aws_availability_zones.defaultAZs.names[0]}"
        );
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let build = |name: &str| {
            let mut graph = ResourceGraph::new("test");
            sg(&mut graph, name);
            graph.fingerprint()
        };
        assert_eq!(build("a"), build("a"));
        assert_ne!(build("a"), build("b"));
        assert_eq!(build("a").len(), 64);
    }
}
