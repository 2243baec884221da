//! Provider nodes.

use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::graph::ResourceGraph;
use crate::naming::Naming;

/// Alias of the secondary-region provider, as written in `provider` attributes.
pub const SECONDARY_ALIAS: &str = "aws.secondary";

#[derive(Debug, Clone)]
pub struct Providers {
    pub aws: NodeHandle,
    pub archive: NodeHandle,
}

pub fn declare(graph: &mut ResourceGraph, naming: &Naming, region: &str) -> Result<Providers> {
    let aws = graph
        .declare(ResourceKind::AwsProvider, "aws")
        .attr("region", region)
        .attr(
            "default_tags",
            AttrValue::map([("tags", AttrValue::map([("app", naming.app())]))]),
        )
        .finish()?;
    let archive = graph.declare(ResourceKind::ArchiveProvider, "archive").finish()?;

    Ok(Providers { aws, archive })
}

/// Aliased provider for resources that live in the backup region.
pub fn declare_secondary(graph: &mut ResourceGraph, naming: &Naming, region: &str) -> Result<NodeHandle> {
    graph
        .declare(ResourceKind::AwsProvider, "aws-secondary-region")
        .attr("alias", "secondary")
        .attr("region", region)
        .attr(
            "default_tags",
            AttrValue::map([("tags", AttrValue::map([("app", naming.app())]))]),
        )
        .finish()
}
