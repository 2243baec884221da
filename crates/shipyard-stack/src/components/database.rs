//! Managed database cluster and the secret-store entries that publish its
//! connection settings.

use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::binder::{GroupSpec, SecurityGroupBinder};
use crate::components::network::Network;
use crate::graph::ResourceGraph;
use crate::naming::Naming;
use crate::subsystems::DatabaseParams;

pub const MYSQL_PORT: u16 = 3306;

/// One published connection setting.
#[derive(Debug, Clone)]
pub struct DatabaseSecret {
    /// Variable name the container sees.
    pub env_name: &'static str,
    pub parameter: NodeHandle,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub security_group: NodeHandle,
    pub cluster: NodeHandle,
    pub secrets: Vec<DatabaseSecret>,
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    binder: &mut SecurityGroupBinder,
    network: &Network,
    params: &DatabaseParams,
) -> Result<Database> {
    let security_group = binder.declare_group(
        graph,
        GroupSpec::new("db-sg", naming.name("db"), "Database access", network.vpc_id()),
    )?;

    let cluster = graph
        .declare(ResourceKind::RdsCluster, "db-cluster")
        .attr("cluster_identifier", naming.app())
        .attr("engine", params.engine.as_str())
        .attr("engine_mode", params.engine_mode.as_str())
        .attr("database_name", params.database_name.as_str())
        .attr("master_username", params.username.as_str())
        .attr("master_password", AttrValue::sensitive(params.password.as_str()))
        .attr("skip_final_snapshot", params.skip_final_snapshot)
        .attr(
            "vpc_security_group_ids",
            AttrValue::list([security_group.id_ref()]),
        )
        .attr(
            "scaling_configuration",
            AttrValue::map([
                ("auto_pause", AttrValue::from(true)),
                ("min_capacity", AttrValue::from(params.min_capacity)),
                ("max_capacity", AttrValue::from(params.max_capacity)),
            ]),
        )
        .finish()?;

    let entries = [
        ("ssm-db-host", "db-host", "DB_HOST", cluster.reference("endpoint")),
        (
            "ssm-db-user",
            "db-user",
            "DB_USER",
            AttrValue::from(params.username.as_str()),
        ),
        (
            "ssm-db-password",
            "db-password",
            "DB_PASSWORD",
            AttrValue::sensitive(params.password.as_str()),
        ),
        (
            "ssm-db-name",
            "db-name",
            "DB_NAME",
            AttrValue::from(params.database_name.as_str()),
        ),
    ];

    let mut secrets = Vec::with_capacity(entries.len());
    for (id, key, env_name, value) in entries {
        let secure = matches!(value, AttrValue::Sensitive(_));
        let parameter = graph
            .declare(ResourceKind::SsmParameter, id)
            .attr("name", format!("/{}/{}", naming.app(), key))
            .attr("type", if secure { "SecureString" } else { "String" })
            .attr("value", value)
            .finish()?;
        secrets.push(DatabaseSecret {
            env_name,
            parameter,
        });
    }

    Ok(Database {
        security_group,
        cluster,
        secrets,
    })
}
