//! Shared network filesystem.

use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::binder::{GroupSpec, SecurityGroupBinder};
use crate::components::network::Network;
use crate::graph::ResourceGraph;
use crate::naming::Naming;

/// NFS port admitted by the filesystem group.
pub const NFS_PORT: u16 = 2049;

#[derive(Debug, Clone)]
pub struct SharedFilesystem {
    pub security_group: NodeHandle,
    pub file_system: NodeHandle,
    pub mount_targets: Vec<NodeHandle>,
    pub access_point: NodeHandle,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    binder: &mut SecurityGroupBinder,
    network: &Network,
) -> Result<SharedFilesystem> {
    let security_group = binder.declare_group(
        graph,
        GroupSpec::new(
            "efs-data-sg",
            naming.name("efs-data-sg"),
            "Shared filesystem access",
            network.vpc_id(),
        ),
    )?;

    let file_system = graph
        .declare(ResourceKind::EfsFileSystem, "efs-disk-data")
        .attr("creation_token", naming.name("data"))
        .attr("encrypted", true)
        .attr("tags", AttrValue::map([("Name", naming.name("data"))]))
        .finish()?;

    let mut mount_targets = Vec::with_capacity(network.subnets.len());
    for (i, subnet) in network.subnets.iter().enumerate() {
        let target = graph
            .declare(
                ResourceKind::EfsMountTarget,
                format!("efs-mount-target-data-{}", i + 1),
            )
            .attr("file_system_id", file_system.id_ref())
            .attr("subnet_id", subnet.id_ref())
            .attr("security_groups", AttrValue::list([security_group.id_ref()]))
            .finish()?;
        mount_targets.push(target);
    }

    let access_point = graph
        .declare(ResourceKind::EfsAccessPoint, "efs-access-data-point")
        .attr("file_system_id", file_system.id_ref())
        .attr("posix_user", AttrValue::map([("uid", 0i64), ("gid", 0i64)]))
        .attr(
            "root_directory",
            AttrValue::map([
                ("path", AttrValue::from("/")),
                (
                    "creation_info",
                    AttrValue::map([
                        ("owner_uid", AttrValue::from(0i64)),
                        ("owner_gid", AttrValue::from(0i64)),
                        ("permissions", AttrValue::from("0777")),
                    ]),
                ),
            ]),
        )
        .depends_on_all(&mount_targets)
        .finish()?;

    Ok(SharedFilesystem {
        security_group,
        file_system,
        mount_targets,
        access_point,
    })
}
