//! Write operations for the inventory graph.
//!
//! All mutations use MERGE (upsert) semantics on natural keys: NetworkNode by
//! `ip`, Interface by `(node_id, if_index)`, VlanMembership by
//! `(node_id, vlan_id, interface_id)`.

use chrono::Utc;
use neo4rs::query;

use netsync_core::{is_excluded_vlan, Interface, MembershipKey, NetNode, NodeId, VlanMembership};

use crate::client::{GraphClient, GraphError};

impl GraphClient {
    // ── Node Upserts ─────────────────────────────────────────────

    /// Upsert a NetworkNode keyed by management IP.
    ///
    /// Unknown CPU/RAM readings leave the stored values untouched.
    pub async fn upsert_network_node(&self, node: &NetNode) -> Result<(), GraphError> {
        let q = query(
            "MERGE (n:NetworkNode {ip: $ip})
             ON CREATE SET n.id = $id, n.first_seen = $now
             SET n.hostname = $hostname, n.community = $community,
                 n.vendor = $vendor, n.status = $status,
                 n.inventory_id = $inventory_id,
                 n.cpu_percent = CASE WHEN $cpu < 0 THEN n.cpu_percent ELSE $cpu END,
                 n.ram_percent = CASE WHEN $ram < 0 THEN n.ram_percent ELSE $ram END,
                 n.last_seen = $now",
        )
        .param("ip", node.ip.clone())
        .param("id", node.id.0.to_string())
        .param("hostname", opt_string(&node.hostname))
        .param("community", opt_string(&node.community))
        .param("vendor", node.vendor.as_str().to_string())
        .param("status", node.status.as_str().to_string())
        .param("inventory_id", node.inventory_id.map(|v| v as i64).unwrap_or(-1))
        .param("cpu", node.cpu_percent.unwrap_or(-1.0))
        .param("ram", node.ram_percent.unwrap_or(-1.0))
        .param("now", Utc::now().to_rfc3339());

        self.run(q).await
    }

    // ── Interface Upserts ────────────────────────────────────────

    /// Upsert an Interface keyed by (node_id, if_index) and link it to its node.
    ///
    /// Fails with `MissingParent` when the NetworkNode has not been written yet.
    pub async fn merge_interface(&self, iface: &Interface) -> Result<(), GraphError> {
        let q = query(
            "MATCH (n:NetworkNode {id: $node_id})
             MERGE (i:Interface {node_id: $node_id, if_index: $if_index})
             ON CREATE SET i.id = $id, i.first_seen = $now
             SET i.name = $name, i.description = $description, i.status = $status,
                 i.optical_tx_dbm = CASE WHEN $has_tx THEN $tx ELSE null END,
                 i.optical_rx_dbm = CASE WHEN $has_rx THEN $rx ELSE null END,
                 i.last_seen = $now
             MERGE (n)-[:HAS_INTERFACE]->(i)
             RETURN count(i) AS cnt",
        )
        .param("node_id", iface.node_id.0.to_string())
        .param("if_index", iface.if_index as i64)
        .param("id", iface.id.0.to_string())
        .param("name", iface.name.clone())
        .param("description", opt_string(&iface.description))
        .param("status", iface.status.as_str().to_string())
        .param("has_tx", iface.optical_tx_dbm.is_some())
        .param("tx", iface.optical_tx_dbm.unwrap_or(0.0))
        .param("has_rx", iface.optical_rx_dbm.is_some())
        .param("rx", iface.optical_rx_dbm.unwrap_or(0.0))
        .param("now", Utc::now().to_rfc3339());

        if self.write_count(q).await? == 0 {
            return Err(GraphError::MissingParent {
                label: "NetworkNode".to_string(),
                id: iface.node_id.to_string(),
            });
        }
        Ok(())
    }

    /// Force every interface of a node to `down`. Returns the count touched.
    pub async fn mark_node_interfaces_down(&self, node_id: &NodeId) -> Result<i64, GraphError> {
        let q = query(
            "MATCH (i:Interface {node_id: $node_id})
             SET i.status = 'down', i.last_seen = $now
             RETURN count(i) AS cnt",
        )
        .param("node_id", node_id.0.to_string())
        .param("now", Utc::now().to_rfc3339());

        self.write_count(q).await
    }

    // ── VLAN Membership ──────────────────────────────────────────

    /// Upsert a VlanMembership keyed by (node_id, vlan_id, interface_id).
    ///
    /// VLANs 1 and 99 are rejected; the Interface must already exist.
    pub async fn upsert_membership(&self, membership: &VlanMembership) -> Result<(), GraphError> {
        if is_excluded_vlan(membership.vlan_id) {
            return Err(GraphError::ExcludedVlan(membership.vlan_id));
        }

        let q = query(
            "MATCH (i:Interface {id: $interface_id})
             MERGE (m:VlanMembership {node_id: $node_id, vlan_id: $vlan_id, interface_id: $interface_id})
             ON CREATE SET m.first_seen = $now
             SET m.interface_name = $interface_name, m.tagged = $tagged,
                 m.vlan_name = $vlan_name, m.last_seen = $now
             MERGE (i)-[:IN_VLAN]->(m)
             RETURN count(m) AS cnt",
        )
        .param("node_id", membership.node_id.0.to_string())
        .param("vlan_id", membership.vlan_id as i64)
        .param("interface_id", membership.interface_id.0.to_string())
        .param("interface_name", membership.interface_name.clone())
        .param("tagged", membership.tagged)
        .param("vlan_name", opt_string(&membership.vlan_name))
        .param("now", Utc::now().to_rfc3339());

        if self.write_count(q).await? == 0 {
            return Err(GraphError::MissingParent {
                label: "Interface".to_string(),
                id: membership.interface_id.to_string(),
            });
        }
        Ok(())
    }

    /// Delete a single membership row. Returns the count removed (0 or 1).
    pub async fn delete_membership(&self, key: &MembershipKey) -> Result<i64, GraphError> {
        let q = query(
            "MATCH (m:VlanMembership {node_id: $node_id, vlan_id: $vlan_id, interface_id: $interface_id})
             DETACH DELETE m
             RETURN count(m) AS cnt",
        )
        .param("node_id", key.node_id.0.to_string())
        .param("vlan_id", key.vlan_id as i64)
        .param("interface_id", key.interface_id.0.to_string());

        self.write_count(q).await
    }

    /// Run a write that ends in `RETURN count(..) AS cnt`. No row counts as zero.
    async fn write_count(&self, q: neo4rs::Query) -> Result<i64, GraphError> {
        match self.query_one(q).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn opt_string(opt: &Option<String>) -> String {
    opt.clone().unwrap_or_default()
}
