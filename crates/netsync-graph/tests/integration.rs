//! Integration tests for netsync-graph against a live Neo4j instance.
//!
//! These tests require `docker compose up` to be running.
//! Run with: cargo test --package netsync-graph --test integration -- --ignored

use netsync_core::{
    CanonicalStore, Interface, NetNode, NetsyncError, NodeId, OperStatus, Vendor, VlanMembership,
};
use netsync_graph::{GraphClient, GraphConfig};

async fn connect_or_skip() -> Option<GraphClient> {
    let config = GraphConfig::default();
    match GraphClient::connect(&config).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test (Neo4j not available): {e}");
            None
        }
    }
}

async fn cleanup(client: &GraphClient, ip: &str) {
    let node_id = NodeId::for_ip(ip);
    let q = neo4rs::query(
        "MATCH (n) WHERE n.ip = $ip OR n.node_id = $node_id DETACH DELETE n",
    )
    .param("ip", ip.to_string())
    .param("node_id", node_id.0.to_string());
    let _ = client.run(q).await;
}

fn make_node(ip: &str) -> NetNode {
    let mut node = NetNode::new(ip, Vendor::Mikrotik, OperStatus::Up);
    node.hostname = Some("edge-01".to_string());
    node.community = Some("public".to_string());
    node.cpu_percent = Some(7.0);
    node
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_node_upsert_is_idempotent() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.10";
    cleanup(&client, ip).await;

    let node = make_node(ip);
    client.upsert_node(&node).await.unwrap();
    client.upsert_node(&node).await.unwrap();

    let nodes: Vec<NetNode> = client
        .list_nodes()
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.ip == ip)
        .collect();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].cpu_percent, Some(7.0));
    assert_eq!(nodes[0].vendor, Vendor::Mikrotik);

    cleanup(&client, ip).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_unknown_usage_keeps_previous_value() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.11";
    cleanup(&client, ip).await;

    let mut node = make_node(ip);
    client.upsert_node(&node).await.unwrap();
    node.cpu_percent = None;
    client.upsert_node(&node).await.unwrap();

    let stored = client
        .list_nodes()
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.ip == ip)
        .unwrap();
    assert_eq!(stored.cpu_percent, Some(7.0));

    cleanup(&client, ip).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_interfaces_forced_down() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.12";
    cleanup(&client, ip).await;

    let node = make_node(ip);
    client.upsert_node(&node).await.unwrap();

    let mut iface = Interface::new(&node.id, 3, "sfp-sfpplus2");
    iface.status = OperStatus::Up;
    iface.optical_rx_dbm = Some(-7.4);
    client.upsert_interface(&iface).await.unwrap();

    assert_eq!(client.mark_interfaces_down(&node.id).await.unwrap(), 1);

    let rows = client.list_interfaces(&node.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, OperStatus::Down);
    assert_eq!(rows[0].optical_rx_dbm, Some(-7.4));
    assert_eq!(rows[0].optical_tx_dbm, None);

    cleanup(&client, ip).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_membership_upsert_and_removal() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.13";
    cleanup(&client, ip).await;

    let node = make_node(ip);
    client.upsert_node(&node).await.unwrap();
    let iface = Interface::new(&node.id, 4, "ether4");
    client.upsert_interface(&iface).await.unwrap();

    let mut membership = VlanMembership {
        node_id: node.id.clone(),
        vlan_id: 117,
        interface_id: iface.id.clone(),
        interface_name: iface.name.clone(),
        tagged: true,
        vlan_name: Some("cctv".to_string()),
    };
    client.upsert_vlan_membership(&membership).await.unwrap();
    membership.tagged = false;
    client.upsert_vlan_membership(&membership).await.unwrap();

    let rows = client.list_vlan_memberships(&node.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].tagged);
    assert_eq!(rows[0].interface_id, iface.id);

    let removed = client
        .remove_vlan_memberships(&[membership.key()])
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(client.list_vlan_memberships(&node.id).await.unwrap().is_empty());

    cleanup(&client, ip).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_children_without_parent_are_rejected() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.14";
    cleanup(&client, ip).await;

    let node_id = NodeId::for_ip(ip);
    let iface = Interface::new(&node_id, 2, "ether2");
    assert!(matches!(
        client.upsert_interface(&iface).await,
        Err(NetsyncError::MissingParent(_))
    ));
    assert!(client.list_interfaces(&node_id).await.unwrap().is_empty());

    let membership = VlanMembership {
        node_id: node_id.clone(),
        vlan_id: 117,
        interface_id: iface.id.clone(),
        interface_name: iface.name.clone(),
        tagged: false,
        vlan_name: None,
    };
    assert!(matches!(
        client.upsert_vlan_membership(&membership).await,
        Err(NetsyncError::MissingParent(_))
    ));
    assert!(client.list_vlan_memberships(&node_id).await.unwrap().is_empty());

    cleanup(&client, ip).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j"]
async fn test_excluded_vlan_is_rejected() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ip = "198.51.100.15";
    cleanup(&client, ip).await;

    let node = make_node(ip);
    client.upsert_node(&node).await.unwrap();
    let iface = Interface::new(&node.id, 1, "ether1");
    client.upsert_interface(&iface).await.unwrap();

    let membership = VlanMembership {
        node_id: node.id.clone(),
        vlan_id: 99,
        interface_id: iface.id.clone(),
        interface_name: iface.name.clone(),
        tagged: true,
        vlan_name: None,
    };
    assert!(matches!(
        client.upsert_vlan_membership(&membership).await,
        Err(NetsyncError::PolicyViolation(_))
    ));
    assert!(client.list_vlan_memberships(&node.id).await.unwrap().is_empty());

    cleanup(&client, ip).await;
}
