//! Core domain types for the netsync inventory.
//!
//! Every record is addressed by its natural key: nodes by management IP,
//! interfaces by (node, ifIndex), VLAN memberships by (node, vlan, interface).
//! Ids are UUIDv5 derivations of those keys so repeated upserts land on the
//! same row.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace UUID for deterministic node/interface ids.
const NETSYNC_NS: Uuid = Uuid::from_bytes([
    0x3f, 0x1c, 0x5e, 0x72, 0x8a, 0x04, 0x4b, 0x9d, 0xa1, 0x6e, 0x27, 0xc0, 0x5d, 0x8b, 0x14, 0xe9,
]);

/// VLAN ids that are never persisted (native and management VLAN by convention).
pub const EXCLUDED_VLAN_IDS: [u16; 2] = [1, 99];

pub fn is_excluded_vlan(vlan_id: u16) -> bool {
    EXCLUDED_VLAN_IDS.contains(&vlan_id)
}

// ── Identifiers ───────────────────────────────────────────────────

/// Identifier of a managed network node, derived from its management IP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn for_ip(ip: &str) -> Self {
        Self(Uuid::new_v5(&NETSYNC_NS, format!("node:{ip}").as_bytes()))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an interface, derived from its owning node and ifIndex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterfaceId(pub Uuid);

impl InterfaceId {
    pub fn for_port(node_id: &NodeId, if_index: u32) -> Self {
        Self(Uuid::new_v5(
            &NETSYNC_NS,
            format!("iface:{}:{if_index}", node_id.0).as_bytes(),
        ))
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enums ─────────────────────────────────────────────────────────

/// Operational status shared by nodes and interfaces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperStatus {
    Up,
    #[default]
    Down,
}

impl OperStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

impl fmt::Display for OperStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" | "1" | "true" => Ok(Self::Up),
            "down" | "0" | "false" | "lowerlayerdown" | "notpresent" => Ok(Self::Down),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Vendor tag assigned to a device by OS string classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Mikrotik,
    Juniper,
    Huawei,
    Cisco,
    Hp,
    #[default]
    Generic,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mikrotik => "mikrotik",
            Self::Juniper => "juniper",
            Self::Huawei => "huawei",
            Self::Cisco => "cisco",
            Self::Hp => "hp",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mikrotik" => Ok(Self::Mikrotik),
            "juniper" => Ok(Self::Juniper),
            "huawei" => Ok(Self::Huawei),
            "cisco" => Ok(Self::Cisco),
            "hp" => Ok(Self::Hp),
            "generic" | "" => Ok(Self::Generic),
            other => Err(format!("unknown vendor: {other}")),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────

/// A managed network device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetNode {
    pub id: NodeId,
    pub ip: String,
    pub hostname: Option<String>,
    pub community: Option<String>,
    pub vendor: Vendor,
    pub status: OperStatus,
    /// Last observed CPU utilization in percent.
    pub cpu_percent: Option<f64>,
    /// Last observed RAM utilization in percent.
    pub ram_percent: Option<f64>,
    /// Device id in the upstream inventory source.
    pub inventory_id: Option<u64>,
}

impl NetNode {
    pub fn new(ip: impl Into<String>, vendor: Vendor, status: OperStatus) -> Self {
        let ip = ip.into();
        Self {
            id: NodeId::for_ip(&ip),
            ip,
            hostname: None,
            community: None,
            vendor,
            status,
            cpu_percent: None,
            ram_percent: None,
            inventory_id: None,
        }
    }

    /// Display name used in change records: hostname when known, IP otherwise.
    pub fn display_name(&self) -> &str {
        self.hostname
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.ip)
    }

    /// SNMP community, if one is configured and non-empty.
    pub fn snmp_community(&self) -> Option<&str> {
        self.community.as_deref().filter(|c| !c.is_empty())
    }
}

/// A network interface owned by a node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interface {
    pub id: InterfaceId,
    pub node_id: NodeId,
    pub if_index: u32,
    pub name: String,
    pub description: Option<String>,
    pub status: OperStatus,
    pub optical_tx_dbm: Option<f64>,
    pub optical_rx_dbm: Option<f64>,
}

impl Interface {
    pub fn new(node_id: &NodeId, if_index: u32, name: impl Into<String>) -> Self {
        Self {
            id: InterfaceId::for_port(node_id, if_index),
            node_id: node_id.clone(),
            if_index,
            name: name.into(),
            description: None,
            status: OperStatus::Down,
            optical_tx_dbm: None,
            optical_rx_dbm: None,
        }
    }
}

/// Natural key of a VLAN membership row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MembershipKey {
    pub node_id: NodeId,
    pub vlan_id: u16,
    pub interface_id: InterfaceId,
}

/// Membership of one interface in one VLAN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VlanMembership {
    pub node_id: NodeId,
    pub vlan_id: u16,
    pub interface_id: InterfaceId,
    pub interface_name: String,
    pub tagged: bool,
    pub vlan_name: Option<String>,
}

impl VlanMembership {
    pub fn key(&self) -> MembershipKey {
        MembershipKey {
            node_id: self.node_id.clone(),
            vlan_id: self.vlan_id,
            interface_id: self.interface_id.clone(),
        }
    }
}
