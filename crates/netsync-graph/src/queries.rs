//! Read operations: snapshots of persisted inventory used for diffing.

use neo4rs::query;
use uuid::Uuid;

use netsync_core::{Interface, InterfaceId, NetNode, NodeId, OperStatus, Vendor, VlanMembership};

use crate::client::{decode_err, GraphClient, GraphError};

impl GraphClient {
    /// List every NetworkNode.
    pub async fn list_network_nodes(&self) -> Result<Vec<NetNode>, GraphError> {
        let q = query("MATCH (n:NetworkNode) RETURN n ORDER BY n.ip");
        self.query_nodes(q, "n", "NetworkNode", neo4j_node_to_net_node)
            .await
    }

    /// List the interfaces owned by a node, ordered by ifIndex.
    pub async fn list_node_interfaces(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<Interface>, GraphError> {
        let q = query(
            "MATCH (i:Interface {node_id: $node_id})
             RETURN i ORDER BY i.if_index",
        )
        .param("node_id", node_id.0.to_string());

        self.query_nodes(q, "i", "Interface", |n| neo4j_node_to_interface(n, node_id))
            .await
    }

    /// List the VLAN memberships of a node.
    pub async fn list_node_memberships(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<VlanMembership>, GraphError> {
        let q = query(
            "MATCH (m:VlanMembership {node_id: $node_id})
             RETURN m ORDER BY m.vlan_id, m.interface_name",
        )
        .param("node_id", node_id.0.to_string());

        self.query_nodes(q, "m", "VlanMembership", |n| {
            neo4j_node_to_membership(n, node_id)
        })
        .await
    }
}

fn neo4j_node_to_net_node(node: &neo4rs::Node) -> Result<NetNode, GraphError> {
    let ip: String = node.get("ip").map_err(|e| decode_err("NetworkNode", e))?;
    let vendor = node
        .get::<String>("vendor")
        .ok()
        .and_then(|v| v.parse::<Vendor>().ok())
        .unwrap_or_default();

    Ok(NetNode {
        id: NodeId::for_ip(&ip),
        hostname: non_empty(node.get::<String>("hostname").ok()),
        community: non_empty(node.get::<String>("community").ok()),
        vendor,
        status: parse_status(node),
        cpu_percent: node.get::<f64>("cpu_percent").ok(),
        ram_percent: node.get::<f64>("ram_percent").ok(),
        inventory_id: node
            .get::<i64>("inventory_id")
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as u64),
        ip,
    })
}

fn neo4j_node_to_interface(node: &neo4rs::Node, node_id: &NodeId) -> Result<Interface, GraphError> {
    let if_index: i64 = node.get("if_index").map_err(|e| decode_err("Interface", e))?;
    let if_index = u32::try_from(if_index).map_err(|e| decode_err("Interface", e))?;

    Ok(Interface {
        id: InterfaceId::for_port(node_id, if_index),
        node_id: node_id.clone(),
        if_index,
        name: node.get::<String>("name").unwrap_or_default(),
        description: non_empty(node.get::<String>("description").ok()),
        status: parse_status(node),
        optical_tx_dbm: node.get::<f64>("optical_tx_dbm").ok(),
        optical_rx_dbm: node.get::<f64>("optical_rx_dbm").ok(),
    })
}

fn neo4j_node_to_membership(
    node: &neo4rs::Node,
    node_id: &NodeId,
) -> Result<VlanMembership, GraphError> {
    let vlan_id: i64 = node.get("vlan_id").map_err(|e| decode_err("VlanMembership", e))?;
    let interface_id: String = node
        .get("interface_id")
        .map_err(|e| decode_err("VlanMembership", e))?;
    let interface_id =
        Uuid::parse_str(&interface_id).map_err(|e| decode_err("VlanMembership", e))?;

    Ok(VlanMembership {
        node_id: node_id.clone(),
        vlan_id: u16::try_from(vlan_id).map_err(|e| decode_err("VlanMembership", e))?,
        interface_id: InterfaceId(interface_id),
        interface_name: node.get::<String>("interface_name").unwrap_or_default(),
        tagged: node.get::<bool>("tagged").unwrap_or(false),
        vlan_name: non_empty(node.get::<String>("vlan_name").ok()),
    })
}

fn parse_status(node: &neo4rs::Node) -> OperStatus {
    node.get::<String>("status")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_default()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
