//! Two-phase security group construction.
//!
//! Groups that admit each other cannot be declared with their final rules,
//! because each would need the other's identifier first. Phase 1 declares
//! every group with self-contained rules only. Components then record the
//! cross-group admissions they need, and phase 2 ([`SecurityGroupBinder::bind`])
//! issues one replace-all `ingress` patch per admitted group.

use shipyard_core::access::{AccessRule, Protocol, rules_to_attr};
use shipyard_core::{AttrValue, Error, NodeHandle, NodeId, Patch, ResourceKind, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::graph::ResourceGraph;

/// Phase-1 description of a security group.
#[derive(Debug, Clone)]
pub struct GroupSpec {
    pub id: NodeId,
    pub name: String,
    pub description: String,
    pub vpc_id: AttrValue,
    /// Address-range rules only.
    pub ingress: Vec<AccessRule>,
    pub egress: Vec<AccessRule>,
}

impl GroupSpec {
    /// A group with unrestricted egress and no inbound rules.
    pub fn new(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        description: impl Into<String>,
        vpc_id: AttrValue,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            vpc_id,
            ingress: Vec::new(),
            egress: vec![AccessRule::allow_all_outbound()],
        }
    }

    pub fn ingress(mut self, rule: AccessRule) -> Self {
        self.ingress.push(rule);
        self
    }
}

#[derive(Debug)]
struct BoundGroup {
    base_ingress: Vec<AccessRule>,
}

#[derive(Debug, Default)]
pub struct SecurityGroupBinder {
    groups: BTreeMap<NodeId, BoundGroup>,
    admissions: BTreeMap<NodeId, Vec<AccessRule>>,
}

impl SecurityGroupBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: declare a group with its self-contained rules.
    pub fn declare_group(&mut self, graph: &mut ResourceGraph, spec: GroupSpec) -> Result<NodeHandle> {
        if let Some(rule) = spec.ingress.iter().find(|r| r.references_groups()) {
            return Err(Error::InvalidInput(format!(
                "group {} declares inbound rule on ports {}-{} naming another group; use admit",
                spec.id, rule.from_port, rule.to_port
            )));
        }

        let ingress = AccessRule::merge(spec.ingress);
        let egress = AccessRule::merge(spec.egress);
        let handle = graph
            .declare(ResourceKind::SecurityGroup, spec.id)
            .attr("name", spec.name)
            .attr("description", spec.description)
            .attr("vpc_id", spec.vpc_id)
            .attr("ingress", rules_to_attr(&ingress))
            .attr("egress", rules_to_attr(&egress))
            .finish()?;

        self.groups.insert(
            handle.id().clone(),
            BoundGroup {
                base_ingress: ingress,
            },
        );
        Ok(handle)
    }

    /// Record that `target` must admit traffic from `source`.
    pub fn admit(
        &mut self,
        target: &NodeHandle,
        source: &NodeHandle,
        protocol: Protocol,
        from_port: u16,
        to_port: u16,
    ) -> Result<()> {
        for group in [target, source] {
            if !self.groups.contains_key(group.id()) {
                return Err(Error::UnknownNode(format!(
                    "{} was not declared through the binder",
                    group.id()
                )));
            }
        }

        debug!(target = %target.id(), source = %source.id(), from_port, to_port, "admission recorded");
        self.admissions
            .entry(target.id().clone())
            .or_default()
            .push(AccessRule::inbound(protocol, from_port, to_port).from_group(source));
        Ok(())
    }

    /// Complete inbound rule list of every group that has admissions.
    pub fn compute(&self) -> BTreeMap<NodeId, Vec<AccessRule>> {
        self.admissions
            .iter()
            .filter_map(|(target, admitted)| {
                let group = self.groups.get(target)?;
                let rules = AccessRule::merge(
                    group
                        .base_ingress
                        .iter()
                        .cloned()
                        .chain(admitted.iter().cloned()),
                );
                Some((target.clone(), rules))
            })
            .collect()
    }

    /// Phase 2: register one `ingress` patch per admitted group.
    ///
    /// Every group must already be in the graph, which holds because
    /// `declare_group` and `admit` both require it.
    pub fn bind(self, graph: &mut ResourceGraph) -> Result<BTreeMap<NodeId, Vec<AccessRule>>> {
        let bindings = self.compute();
        for (target, rules) in &bindings {
            graph.register_patch(Patch {
                target: target.clone(),
                attribute: "ingress".to_string(),
                value: rules_to_attr(rules),
            })?;
        }
        info!(
            groups = self.groups.len(),
            patched = bindings.len(),
            "security groups bound"
        );
        Ok(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::access::{ANYWHERE, Peer};

    fn vpc(graph: &mut ResourceGraph) -> NodeHandle {
        graph.declare(ResourceKind::Vpc, "VPC").finish().unwrap()
    }

    fn declare(binder: &mut SecurityGroupBinder, graph: &mut ResourceGraph, id: &str) -> NodeHandle {
        let vpc = graph.handle(&NodeId::from("VPC")).unwrap();
        binder
            .declare_group(graph, GroupSpec::new(id, id, id, vpc.id_ref()))
            .unwrap()
    }

    fn peers(rules: &[AccessRule]) -> Vec<Vec<Peer>> {
        rules.iter().map(|r| r.peers.iter().cloned().collect()).collect()
    }

    #[test]
    fn test_phase_one_rejects_group_peers() {
        let mut graph = ResourceGraph::new("test");
        let vpc = vpc(&mut graph);
        let mut binder = SecurityGroupBinder::new();
        let alb = declare(&mut binder, &mut graph, "alb-sg");

        let spec = GroupSpec::new("ecs-sg", "ecs", "ecs", vpc.id_ref())
            .ingress(AccessRule::inbound(Protocol::All, 0, 0).from_group(&alb));
        assert!(matches!(
            binder.declare_group(&mut graph, spec),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_admit_requires_declared_groups() {
        let mut graph = ResourceGraph::new("test");
        vpc(&mut graph);
        let mut binder = SecurityGroupBinder::new();
        let ecs = declare(&mut binder, &mut graph, "ecs-sg");
        let stranger = NodeHandle::new(ResourceKind::SecurityGroup, "stranger".into());

        assert!(matches!(
            binder.admit(&ecs, &stranger, Protocol::Tcp, 80, 80),
            Err(Error::UnknownNode(_))
        ));
    }

    #[test]
    fn test_bind_merges_sources_into_one_patch_per_group() {
        let mut graph = ResourceGraph::new("test");
        vpc(&mut graph);
        let mut binder = SecurityGroupBinder::new();
        let efs = declare(&mut binder, &mut graph, "efs-data-sg");
        let lambda = declare(&mut binder, &mut graph, "s3-to-efs-lambda-sg");
        let ecs = declare(&mut binder, &mut graph, "ecs-sg");

        binder.admit(&efs, &lambda, Protocol::Tcp, 2049, 2049).unwrap();
        binder.admit(&efs, &ecs, Protocol::Tcp, 2049, 2049).unwrap();
        let bindings = binder.bind(&mut graph).unwrap();

        assert_eq!(bindings.len(), 1);
        assert_eq!(
            peers(&bindings[efs.id()]),
            vec![vec![
                Peer::Group("ecs-sg".into()),
                Peer::Group("s3-to-efs-lambda-sg".into())
            ]]
        );
        assert_eq!(graph.patches().count(), 1);
        assert!(graph.patch_for(ecs.id(), "ingress").is_none());
    }

    #[test]
    fn test_bind_is_independent_of_admission_order() {
        let run = |reverse: bool| {
            let mut graph = ResourceGraph::new("test");
            vpc(&mut graph);
            let mut binder = SecurityGroupBinder::new();
            let efs = declare(&mut binder, &mut graph, "efs-data-sg");
            let lambda = declare(&mut binder, &mut graph, "s3-to-efs-lambda-sg");
            let ecs = declare(&mut binder, &mut graph, "ecs-sg");

            let mut sources = vec![&lambda, &ecs];
            if reverse {
                sources.reverse();
            }
            for source in sources {
                binder.admit(&efs, source, Protocol::Tcp, 2049, 2049).unwrap();
            }
            binder.bind(&mut graph).unwrap();
            graph.fingerprint()
        };

        assert_eq!(run(false), run(true));
    }

    #[test]
    fn test_patch_keeps_base_rules_and_is_idempotent() {
        let mut graph = ResourceGraph::new("test");
        let vpc = vpc(&mut graph);
        let mut binder = SecurityGroupBinder::new();
        let alb = binder
            .declare_group(
                &mut graph,
                GroupSpec::new("alb-sg", "alb", "alb", vpc.id_ref())
                    .ingress(AccessRule::inbound(Protocol::Tcp, 80, 80).from_cidr(ANYWHERE)),
            )
            .unwrap();
        let ecs = declare(&mut binder, &mut graph, "ecs-sg");
        binder.admit(&alb, &ecs, Protocol::Tcp, 80, 80).unwrap();
        binder.bind(&mut graph).unwrap();

        let patch = graph.patch_for(alb.id(), "ingress").unwrap().clone();
        let mut node = graph.node(alb.id()).unwrap().clone();
        node.apply_patch(&patch);
        let once = node.attribute("ingress").unwrap().clone();
        node.apply_patch(&patch);
        assert_eq!(node.attribute("ingress").unwrap(), &once);

        let rendered = once.render();
        assert_eq!(rendered.as_array().unwrap().len(), 1);
        assert_eq!(rendered[0]["cidr_blocks"][0], ANYWHERE);
        assert_eq!(
            rendered[0]["security_groups"][0],
            "${aws_security_group.ecs-sg.id}"
        );
    }
}
