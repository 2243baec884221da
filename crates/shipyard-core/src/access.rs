//! Access rules for security groups.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::id::NodeId;
use crate::resource::{AttrValue, NodeHandle, ResourceKind};

/// Address range that matches everything.
pub const ANYWHERE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    All,
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::All => "-1",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Who a rule admits: an address range or a sibling group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Peer {
    Cidr(String),
    Group(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AccessRule {
    pub direction: Direction,
    pub protocol: Protocol,
    pub from_port: u16,
    pub to_port: u16,
    pub peers: BTreeSet<Peer>,
}

impl AccessRule {
    pub fn inbound(protocol: Protocol, from_port: u16, to_port: u16) -> Self {
        Self {
            direction: Direction::Inbound,
            protocol,
            from_port,
            to_port,
            peers: BTreeSet::new(),
        }
    }

    pub fn outbound(protocol: Protocol, from_port: u16, to_port: u16) -> Self {
        Self {
            direction: Direction::Outbound,
            ..Self::inbound(protocol, from_port, to_port)
        }
    }

    /// Unrestricted egress.
    pub fn allow_all_outbound() -> Self {
        Self::outbound(Protocol::All, 0, 0).from_cidr(ANYWHERE)
    }

    pub fn from_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.peers.insert(Peer::Cidr(cidr.into()));
        self
    }

    pub fn from_group(mut self, group: &NodeHandle) -> Self {
        self.peers.insert(Peer::Group(group.id().clone()));
        self
    }

    /// Whether any peer is a sibling group.
    pub fn references_groups(&self) -> bool {
        self.peers.iter().any(|p| matches!(p, Peer::Group(_)))
    }

    /// Merge rules with the same direction, protocol and port range by
    /// unioning their peers. The result is sorted and free of duplicates, so it
    /// does not depend on the order the rules were supplied in.
    pub fn merge<I>(rules: I) -> Vec<AccessRule>
    where
        I: IntoIterator<Item = AccessRule>,
    {
        let mut merged: BTreeMap<(Direction, Protocol, u16, u16), BTreeSet<Peer>> = BTreeMap::new();
        for rule in rules {
            merged
                .entry((rule.direction, rule.protocol, rule.from_port, rule.to_port))
                .or_default()
                .extend(rule.peers);
        }
        merged
            .into_iter()
            .map(|((direction, protocol, from_port, to_port), peers)| AccessRule {
                direction,
                protocol,
                from_port,
                to_port,
                peers,
            })
            .collect()
    }

    /// Attribute form used on the security group node.
    pub fn to_attr(&self) -> AttrValue {
        let cidrs: Vec<AttrValue> = self
            .peers
            .iter()
            .filter_map(|p| match p {
                Peer::Cidr(c) => Some(AttrValue::from(c.as_str())),
                Peer::Group(_) => None,
            })
            .collect();
        let groups: Vec<AttrValue> = self
            .peers
            .iter()
            .filter_map(|p| match p {
                Peer::Group(id) => {
                    Some(NodeHandle::new(ResourceKind::SecurityGroup, id.clone()).id_ref())
                }
                Peer::Cidr(_) => None,
            })
            .collect();

        AttrValue::map([
            ("protocol", AttrValue::from(self.protocol.as_str())),
            ("from_port", AttrValue::from(self.from_port)),
            ("to_port", AttrValue::from(self.to_port)),
            ("cidr_blocks", AttrValue::List(cidrs)),
            ("security_groups", AttrValue::List(groups)),
        ])
    }
}

/// Attribute form of a rule list.
pub fn rules_to_attr(rules: &[AccessRule]) -> AttrValue {
    AttrValue::List(rules.iter().map(AccessRule::to_attr).collect())
}
