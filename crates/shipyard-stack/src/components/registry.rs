//! Container image registry.

use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};
use shipyard_core::event::RELEASE_TAG;

use crate::graph::ResourceGraph;
use crate::naming::Naming;

pub const URL_OUTPUT: &str = "ecr-url";

#[derive(Debug, Clone)]
pub struct Registry {
    pub repository: NodeHandle,
}

impl Registry {
    /// Image URI of the release tag.
    pub fn release_image(&self) -> AttrValue {
        AttrValue::concat([
            self.repository.reference("repository_url"),
            AttrValue::from(format!(":{}", RELEASE_TAG)),
        ])
    }
}

pub fn declare(graph: &mut ResourceGraph, naming: &Naming) -> Result<Registry> {
    let repository = graph
        .declare(ResourceKind::EcrRepository, "ecr-repo")
        .attr("name", naming.app())
        .attr("image_tag_mutability", "MUTABLE")
        .attr(
            "image_scanning_configuration",
            AttrValue::map([("scan_on_push", true)]),
        )
        .finish()?;
    graph.add_output(URL_OUTPUT, repository.reference("repository_url"))?;

    Ok(Registry { repository })
}
