//! Public load balancer with its blue and green target pools.

use shipyard_config::app::LoadBalancerConfig;
use shipyard_core::access::{ANYWHERE, AccessRule, Protocol};
use shipyard_core::release::DeploymentColor;
use shipyard_core::{AttrValue, NodeHandle, ResourceKind, Result};

use crate::binder::{GroupSpec, SecurityGroupBinder};
use crate::components::network::Network;
use crate::graph::ResourceGraph;
use crate::naming::Naming;

pub const DNS_OUTPUT: &str = "alb-dns-name";

#[derive(Debug, Clone)]
pub struct LoadBalancer {
    pub security_group: NodeHandle,
    pub alb: NodeHandle,
    pub blue_pool: NodeHandle,
    pub green_pool: NodeHandle,
    pub listener: NodeHandle,
    pub port: u16,
}

impl LoadBalancer {
    pub fn pool(&self, color: DeploymentColor) -> &NodeHandle {
        match color {
            DeploymentColor::Blue => &self.blue_pool,
            DeploymentColor::Green => &self.green_pool,
        }
    }
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    binder: &mut SecurityGroupBinder,
    network: &Network,
    config: &LoadBalancerConfig,
) -> Result<LoadBalancer> {
    let security_group = binder.declare_group(
        graph,
        GroupSpec::new(
            "alb-sg",
            naming.name("alb-sg"),
            "Load balancer access",
            network.vpc_id(),
        )
        .ingress(AccessRule::inbound(Protocol::Tcp, config.port, config.port).from_cidr(ANYWHERE)),
    )?;

    let alb = graph
        .declare(ResourceKind::Alb, "alb")
        .attr("name", naming.name("alb"))
        .attr("internal", false)
        .attr("load_balancer_type", "application")
        .attr("security_groups", AttrValue::list([security_group.id_ref()]))
        .attr("subnets", network.subnet_ids())
        .finish()?;

    let health_check = AttrValue::map([
        ("path", AttrValue::from(config.health_check.path.as_str())),
        ("interval", AttrValue::from(config.health_check.interval)),
        ("protocol", AttrValue::from(config.health_check.protocol.as_str())),
        ("timeout", AttrValue::from(config.health_check.timeout)),
        (
            "unhealthy_threshold",
            AttrValue::from(config.health_check.unhealthy_threshold),
        ),
        (
            "healthy_threshold",
            AttrValue::from(config.health_check.healthy_threshold),
        ),
        ("matcher", AttrValue::from("200")),
    ]);

    let mut pool = |color: DeploymentColor| {
        graph
            .declare(ResourceKind::AlbTargetGroup, format!("alb-tg-{}", color))
            .attr("name", naming.name(&format!("tg-{}", color)))
            .attr("port", config.port)
            .attr("protocol", "HTTP")
            .attr("target_type", "ip")
            .attr("vpc_id", network.vpc_id())
            .attr("health_check", health_check.clone())
            .finish()
    };
    let green_pool = pool(DeploymentColor::Green)?;
    let blue_pool = pool(DeploymentColor::Blue)?;

    let listener = graph
        .declare(ResourceKind::AlbListener, "alb-listener")
        .attr("load_balancer_arn", alb.arn())
        .attr("port", config.port)
        .attr("protocol", "HTTP")
        .attr(
            "default_action",
            AttrValue::list([AttrValue::map([
                ("type", AttrValue::from("forward")),
                ("target_group_arn", green_pool.arn()),
            ])]),
        )
        .finish()?;

    graph.add_output(DNS_OUTPUT, alb.reference("dns_name"))?;

    Ok(LoadBalancer {
        security_group,
        alb,
        blue_pool,
        green_pool,
        listener,
        port: config.port,
    })
}
