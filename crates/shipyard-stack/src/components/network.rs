//! Base network: address space, subnets and routing.

use shipyard_core::access::ANYWHERE;
use shipyard_core::{AttrValue, Error, NetworkMode, NodeHandle, ResourceKind, Result};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::graph::ResourceGraph;
use crate::naming::Naming;

/// Subnets per network, one per availability zone.
pub const SUBNET_COUNT: usize = 3;

#[derive(Debug, Clone)]
pub struct Network {
    pub mode: NetworkMode,
    pub availability_zones: NodeHandle,
    pub vpc: NodeHandle,
    pub subnets: Vec<NodeHandle>,
    pub endpoint: NodeHandle,
}

impl Network {
    pub fn vpc_id(&self) -> AttrValue {
        self.vpc.id_ref()
    }

    pub fn subnet_ids(&self) -> AttrValue {
        AttrValue::List(self.subnets.iter().map(NodeHandle::id_ref).collect())
    }
}

pub fn declare(
    graph: &mut ResourceGraph,
    naming: &Naming,
    region: &str,
    mode: &NetworkMode,
) -> Result<Network> {
    let availability_zones = graph
        .declare(ResourceKind::AvailabilityZones, "defaultAZs")
        .attr("state", "available")
        .finish()?;

    let (vpc, subnets, route_table) = match mode {
        NetworkMode::Default => {
            let vpc = graph.declare(ResourceKind::DefaultVpc, "vpc").finish()?;
            let mut subnets = Vec::with_capacity(SUBNET_COUNT);
            for i in 0..SUBNET_COUNT {
                let subnet = graph
                    .declare(ResourceKind::DefaultSubnet, format!("subnet{}", i + 1))
                    .attr(
                        "availability_zone",
                        availability_zones.reference(format!("names[{}]", i)),
                    )
                    .finish()?;
                subnets.push(subnet);
            }
            let route_table = vpc.reference("default_route_table_id");
            (vpc, subnets, route_table)
        }
        NetworkMode::Custom { cidr } => {
            let vpc = graph
                .declare(ResourceKind::Vpc, "VPC")
                .attr("cidr_block", cidr.as_str())
                .attr("enable_dns_hostnames", true)
                .attr("enable_dns_support", true)
                .attr("tags", AttrValue::map([("Name", naming.name("vpc"))]))
                .finish()?;

            let mut subnets = Vec::with_capacity(SUBNET_COUNT);
            for i in 0..SUBNET_COUNT {
                let subnet = graph
                    .declare(ResourceKind::Subnet, format!("subnet{}", i + 1))
                    .attr("vpc_id", vpc.id_ref())
                    .attr("cidr_block", cidr_subnet(cidr, 8, i as u32)?)
                    .attr(
                        "availability_zone",
                        availability_zones.reference(format!("names[{}]", i)),
                    )
                    .attr("map_public_ip_on_launch", true)
                    .finish()?;
                subnets.push(subnet);
            }

            let gateway = graph
                .declare(ResourceKind::InternetGateway, "ig")
                .attr("vpc_id", vpc.id_ref())
                .finish()?;
            let route_table = graph
                .declare(ResourceKind::RouteTable, "routeTable")
                .attr("vpc_id", vpc.id_ref())
                .attr(
                    "route",
                    AttrValue::list([AttrValue::map([
                        ("cidr_block", AttrValue::from(ANYWHERE)),
                        ("gateway_id", gateway.id_ref()),
                    ])]),
                )
                .finish()?;
            for (i, subnet) in subnets.iter().enumerate() {
                graph
                    .declare(
                        ResourceKind::RouteTableAssociation,
                        format!("routeTableAssociation{}", i + 1),
                    )
                    .attr("subnet_id", subnet.id_ref())
                    .attr("route_table_id", route_table.id_ref())
                    .finish()?;
            }
            (vpc, subnets, route_table.id_ref())
        }
    };

    let endpoint = graph
        .declare(ResourceKind::VpcEndpoint, "vpc-endpoint")
        .attr("vpc_id", vpc.id_ref())
        .attr("service_name", format!("com.amazonaws.{}.s3", region))
        .attr("route_table_ids", AttrValue::list([route_table]))
        .finish()?;

    debug!(vpc = %vpc.id(), subnets = subnets.len(), "declared network");
    Ok(Network {
        mode: mode.clone(),
        availability_zones,
        vpc,
        subnets,
        endpoint,
    })
}

/// Carve subnet `netnum` of `newbits` extra prefix bits out of an IPv4 block.
pub fn cidr_subnet(cidr: &str, newbits: u8, netnum: u32) -> Result<String> {
    let invalid = || Error::InvalidInput(format!("invalid cidr block {}", cidr));

    let (addr, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    let new_prefix = prefix
        .checked_add(newbits)
        .filter(|p| *p <= 32 && prefix <= 32)
        .ok_or_else(invalid)?;
    if newbits < 32 && u64::from(netnum) >= 1u64 << newbits {
        return Err(Error::InvalidInput(format!(
            "subnet {} does not fit in {} bits of {}",
            netnum, newbits, cidr
        )));
    }

    let base = u32::from(addr) & mask(prefix);
    let offset = if new_prefix == 32 {
        netnum
    } else {
        netnum << (32 - new_prefix)
    };
    Ok(format!("{}/{}", Ipv4Addr::from(base | offset), new_prefix))
}

fn mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_subnet() {
        assert_eq!(cidr_subnet("172.17.0.0/16", 8, 0).unwrap(), "172.17.0.0/24");
        assert_eq!(cidr_subnet("172.17.0.0/16", 8, 2).unwrap(), "172.17.2.0/24");
        assert_eq!(cidr_subnet("10.0.0.0/8", 4, 15).unwrap(), "10.240.0.0/12");
    }

    #[test]
    fn test_cidr_subnet_rejects_bad_input() {
        assert!(cidr_subnet("172.17.0.0", 8, 0).is_err());
        assert!(cidr_subnet("172.17.0.0/30", 8, 0).is_err());
        assert!(cidr_subnet("172.17.0.0/16", 8, 256).is_err());
    }

    #[test]
    fn test_default_network_adopts_existing_subnets() {
        let mut graph = ResourceGraph::new("test");
        let network = declare(
            &mut graph,
            &Naming::new("app-name"),
            "us-east-1",
            &NetworkMode::Default,
        )
        .unwrap();

        assert_eq!(network.vpc.kind(), ResourceKind::DefaultVpc);
        assert_eq!(network.subnets.len(), 3);
        assert!(graph.nodes_of_kind(ResourceKind::InternetGateway).is_empty());

        let endpoint = graph.node(network.endpoint.id()).unwrap();
        assert_eq!(
            endpoint.attribute("service_name").unwrap().as_str(),
            Some("com.amazonaws.us-east-1.s3")
        );
        assert_eq!(
            endpoint.attribute("route_table_ids").unwrap().render()[0],
            "${aws_default_vpc.vpc.default_route_table_id}"
        );
    }

    #[test]
    fn test_custom_network_declares_routing() {
        let mut graph = ResourceGraph::new("test");
        let network = declare(
            &mut graph,
            &Naming::new("app-name"),
            "us-east-1",
            &NetworkMode::from_flag(true),
        )
        .unwrap();

        assert_eq!(network.vpc.kind(), ResourceKind::Vpc);
        let cidrs: Vec<_> = network
            .subnets
            .iter()
            .map(|s| {
                graph
                    .node(s.id())
                    .and_then(|n| n.attribute("cidr_block"))
                    .and_then(AttrValue::as_str)
                    .map(str::to_string)
                    .unwrap()
            })
            .collect();
        assert_eq!(cidrs, vec!["172.17.0.0/24", "172.17.1.0/24", "172.17.2.0/24"]);
        assert_eq!(graph.nodes_of_kind(ResourceKind::RouteTableAssociation).len(), 3);
        assert_eq!(graph.nodes_of_kind(ResourceKind::InternetGateway).len(), 1);
    }
}
