//! `CanonicalStore` implementation backed by Neo4j.

use async_trait::async_trait;

use netsync_core::{
    CanonicalStore, Interface, MembershipKey, NetNode, NetsyncError, NodeId, VlanMembership,
};

use crate::client::GraphClient;

#[async_trait]
impl CanonicalStore for GraphClient {
    async fn list_nodes(&self) -> Result<Vec<NetNode>, NetsyncError> {
        Ok(self.list_network_nodes().await?)
    }

    async fn upsert_node(&self, node: &NetNode) -> Result<(), NetsyncError> {
        Ok(self.upsert_network_node(node).await?)
    }

    async fn list_interfaces(&self, node_id: &NodeId) -> Result<Vec<Interface>, NetsyncError> {
        Ok(self.list_node_interfaces(node_id).await?)
    }

    async fn upsert_interface(&self, iface: &Interface) -> Result<(), NetsyncError> {
        Ok(self.merge_interface(iface).await?)
    }

    async fn mark_interfaces_down(&self, node_id: &NodeId) -> Result<u64, NetsyncError> {
        let touched = self.mark_node_interfaces_down(node_id).await?;
        Ok(touched.max(0) as u64)
    }

    async fn list_vlan_memberships(
        &self,
        node_id: &NodeId,
    ) -> Result<Vec<VlanMembership>, NetsyncError> {
        Ok(self.list_node_memberships(node_id).await?)
    }

    async fn upsert_vlan_membership(
        &self,
        membership: &VlanMembership,
    ) -> Result<(), NetsyncError> {
        Ok(self.upsert_membership(membership).await?)
    }

    async fn remove_vlan_memberships(&self, keys: &[MembershipKey]) -> Result<u64, NetsyncError> {
        let mut removed = 0;
        for key in keys {
            removed += self.delete_membership(key).await?.max(0) as u64;
        }
        Ok(removed)
    }
}
