//! Canonical store boundary.
//!
//! The reconciliation engine writes through [`CanonicalStore`] only. All
//! writes are upserts keyed by natural identifiers, so passes can be re-run
//! without producing duplicates.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::NetsyncError;
use crate::types::{
    is_excluded_vlan, Interface, MembershipKey, NetNode, NodeId, OperStatus, VlanMembership,
};

#[async_trait]
pub trait CanonicalStore: Send + Sync {
    /// All known nodes.
    async fn list_nodes(&self) -> Result<Vec<NetNode>, NetsyncError>;

    /// Upsert a node by management IP. `None` usage values keep the stored value.
    async fn upsert_node(&self, node: &NetNode) -> Result<(), NetsyncError>;

    async fn list_interfaces(&self, node_id: &NodeId) -> Result<Vec<Interface>, NetsyncError>;

    /// Upsert an interface by (node, ifIndex). The owning node must exist.
    async fn upsert_interface(&self, iface: &Interface) -> Result<(), NetsyncError>;

    /// Set every interface of a node to down. Returns the number of rows touched.
    async fn mark_interfaces_down(&self, node_id: &NodeId) -> Result<u64, NetsyncError>;

    async fn list_vlan_memberships(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<VlanMembership>, NetsyncError>;

    /// Upsert a membership by (node, vlan, interface). Excluded VLAN ids are
    /// rejected and the interface must exist.
    async fn upsert_vlan_membership(&self, membership: &VlanMembership)
        -> Result<(), NetsyncError>;

    /// Delete the given membership rows. Returns the number removed.
    async fn remove_vlan_memberships(&self, keys: &[MembershipKey]) -> Result<u64, NetsyncError>;
}

/// In-process store, used for dry runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, NetNode>>,
    interfaces: RwLock<HashMap<NodeId, BTreeMap<u32, Interface>>>,
    memberships: RwLock<BTreeMap<MembershipKey, VlanMembership>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total membership rows across all nodes.
    pub async fn membership_count(&self) -> usize {
        self.memberships.read().await.len()
    }
}

#[async_trait]
impl CanonicalStore for MemoryStore {
    async fn list_nodes(&self) -> Result<Vec<NetNode>, NetsyncError> {
        Ok(self.nodes.read().await.values().cloned().collect())
    }

    async fn upsert_node(&self, node: &NetNode) -> Result<(), NetsyncError> {
        let mut nodes = self.nodes.write().await;
        let mut merged = node.clone();
        if let Some(existing) = nodes.get(&node.ip) {
            merged.cpu_percent = node.cpu_percent.or(existing.cpu_percent);
            merged.ram_percent = node.ram_percent.or(existing.ram_percent);
        }
        nodes.insert(node.ip.clone(), merged);
        Ok(())
    }

    async fn list_interfaces(&self, node_id: &NodeId) -> Result<Vec<Interface>, NetsyncError> {
        Ok(self
            .interfaces
            .read()
            .await
            .get(node_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_interface(&self, iface: &Interface) -> Result<(), NetsyncError> {
        let owner_known = self
            .nodes
            .read()
            .await
            .values()
            .any(|n| n.id == iface.node_id);
        if !owner_known {
            return Err(NetsyncError::MissingParent(format!(
                "node {} for interface {}",
                iface.node_id, iface.name
            )));
        }
        self.interfaces
            .write()
            .await
            .entry(iface.node_id.clone())
            .or_default()
            .insert(iface.if_index, iface.clone());
        Ok(())
    }

    async fn mark_interfaces_down(&self, node_id: &NodeId) -> Result<u64, NetsyncError> {
        let mut interfaces = self.interfaces.write().await;
        let Some(owned) = interfaces.get_mut(node_id) else {
            return Ok(0);
        };
        for iface in owned.values_mut() {
            iface.status = OperStatus::Down;
        }
        Ok(owned.len() as u64)
    }

    async fn list_vlan_memberships(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<VlanMembership>, NetsyncError> {
        Ok(self
            .memberships
            .read()
            .await
            .values()
            .filter(|m| &m.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn upsert_vlan_membership(
        &self,
        membership: &VlanMembership,
    ) -> Result<(), NetsyncError> {
        if is_excluded_vlan(membership.vlan_id) {
            return Err(NetsyncError::PolicyViolation(format!(
                "VLAN {} must not be persisted",
                membership.vlan_id
            )));
        }
        let interface_known = self
            .interfaces
            .read()
            .await
            .get(&membership.node_id)
            .is_some_and(|owned| owned.values().any(|i| i.id == membership.interface_id));
        if !interface_known {
            return Err(NetsyncError::MissingParent(format!(
                "interface {} for VLAN {}",
                membership.interface_name, membership.vlan_id
            )));
        }
        self.memberships
            .write()
            .await
            .insert(membership.key(), membership.clone());
        Ok(())
    }

    async fn remove_vlan_memberships(&self, keys: &[MembershipKey]) -> Result<u64, NetsyncError> {
        let mut memberships = self.memberships.write().await;
        let removed = keys
            .iter()
            .filter(|k| memberships.remove(k).is_some())
            .count();
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vendor;

    #[tokio::test]
    async fn test_upsert_node_keeps_usage_when_unknown() {
        let store = MemoryStore::new();
        let mut node = NetNode::new("10.0.0.1", Vendor::Mikrotik, OperStatus::Up);
        node.cpu_percent = Some(12.0);
        node.ram_percent = Some(40.5);
        store.upsert_node(&node).await.unwrap();

        node.cpu_percent = None;
        node.ram_percent = Some(41.0);
        store.upsert_node(&node).await.unwrap();

        let nodes = store.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].cpu_percent, Some(12.0));
        assert_eq!(nodes[0].ram_percent, Some(41.0));
    }

    #[tokio::test]
    async fn test_interface_upsert_is_keyed_by_index() {
        let store = MemoryStore::new();
        let node = NetNode::new("10.0.0.1", Vendor::Mikrotik, OperStatus::Up);
        store.upsert_node(&node).await.unwrap();
        let node_id = node.id.clone();
        let mut iface = Interface::new(&node_id, 2, "ether2");
        store.upsert_interface(&iface).await.unwrap();
        iface.status = OperStatus::Up;
        store.upsert_interface(&iface).await.unwrap();

        let rows = store.list_interfaces(&node_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, OperStatus::Up);

        assert_eq!(store.mark_interfaces_down(&node_id).await.unwrap(), 1);
        let rows = store.list_interfaces(&node_id).await.unwrap();
        assert_eq!(rows[0].status, OperStatus::Down);
    }

    #[tokio::test]
    async fn test_excluded_vlans_are_rejected() {
        let store = MemoryStore::new();
        let node_id = NodeId::for_ip("10.0.0.1");
        let iface = Interface::new(&node_id, 1, "ether1");
        let membership = VlanMembership {
            node_id: node_id.clone(),
            vlan_id: 99,
            interface_id: iface.id.clone(),
            interface_name: iface.name.clone(),
            tagged: true,
            vlan_name: None,
        };
        assert!(matches!(
            store.upsert_vlan_membership(&membership).await,
            Err(NetsyncError::PolicyViolation(_))
        ));
        assert_eq!(store.membership_count().await, 0);
    }

    #[tokio::test]
    async fn test_children_require_their_parent() {
        let store = MemoryStore::new();
        let node_id = NodeId::for_ip("10.0.0.2");
        let iface = Interface::new(&node_id, 3, "ether3");
        assert!(matches!(
            store.upsert_interface(&iface).await,
            Err(NetsyncError::MissingParent(_))
        ));
        assert!(store.list_interfaces(&node_id).await.unwrap().is_empty());

        let membership = VlanMembership {
            node_id: node_id.clone(),
            vlan_id: 117,
            interface_id: iface.id.clone(),
            interface_name: iface.name.clone(),
            tagged: false,
            vlan_name: None,
        };
        assert!(matches!(
            store.upsert_vlan_membership(&membership).await,
            Err(NetsyncError::MissingParent(_))
        ));

        store
            .upsert_node(&NetNode::new("10.0.0.2", Vendor::Generic, OperStatus::Up))
            .await
            .unwrap();
        store.upsert_interface(&iface).await.unwrap();
        store.upsert_vlan_membership(&membership).await.unwrap();
        assert_eq!(store.membership_count().await, 1);
    }
}
