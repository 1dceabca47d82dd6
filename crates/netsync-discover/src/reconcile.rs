//! Reconciliation passes: inventory + SNMP observations → canonical store.
//!
//! Three independent passes, each idempotent:
//! - node: device list, CPU/RAM usage and up/down transitions
//! - interface: inventory ports and optical sensors, forced down with the node
//! - VLAN: SNMP-discovered memberships upserted by natural key
//!
//! A pass that fails does not roll back or block the others.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnet::IpNet;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use netsync_core::{
    CanonicalStore, ChangeKind, Interface, MembershipChange, MembershipChangeKind, MembershipKey,
    NetNode, NodeId, OperStatus, StatusChange, Vendor, VlanMembership,
};

use crate::config::DiscoverConfig;
use crate::error::{DiscoverError, Result};
use crate::inventory::{join_optics, InventoryDevice, InventorySource};
use crate::notify::ChangeNotifier;
use crate::snmp::{SnmpConnector, SnmpTarget};
use crate::usage::UsagePoller;
use crate::vendor::classify_device;
use crate::vlan::{VlanEntry, VlanWalker};

/// Which passes a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Pass {
    Node,
    Interface,
    Vlan,
    All,
}

impl Pass {
    fn includes(self, other: Pass) -> bool {
        self == Pass::All || self == other
    }
}

/// Engine knobs derived from [`DiscoverConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub usage_deadline: Duration,
    pub max_concurrent_devices: usize,
    pub prune_vlan_memberships: bool,
    pub managed_subnets: Vec<IpNet>,
}

impl EngineSettings {
    pub fn from_config(config: &DiscoverConfig) -> Result<Self> {
        let managed_subnets = config
            .managed_subnets
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNet>()
                    .map_err(|e| DiscoverError::Config(format!("invalid subnet {cidr}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            usage_deadline: config.usage_deadline(),
            max_concurrent_devices: config.max_concurrent_devices.max(1),
            prune_vlan_memberships: config.prune_vlan_memberships,
            managed_subnets,
        })
    }

    fn is_managed(&self, ip: &str) -> bool {
        if self.managed_subnets.is_empty() {
            return true;
        }
        ip.parse::<IpAddr>()
            .map(|addr| self.managed_subnets.iter().any(|net| net.contains(&addr)))
            .unwrap_or(false)
    }
}

// ── Reports ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct NodePassReport {
    pub devices_seen: usize,
    /// Devices without a management address or outside the managed subnets.
    pub devices_skipped: usize,
    /// Devices whose CPU/RAM was polled.
    pub polled: usize,
    pub usage_failures: usize,
    pub upserted: usize,
    pub store_failures: usize,
    pub changes: Vec<StatusChange>,
}

#[derive(Debug, Default)]
pub struct InterfacePassReport {
    pub nodes_up: usize,
    pub nodes_down: usize,
    /// Inventory devices with no stored node yet; their ports wait for a node pass.
    pub nodes_unknown: usize,
    pub interfaces_upserted: usize,
    pub interfaces_forced_down: u64,
    pub changes: Vec<StatusChange>,
}

#[derive(Debug, Default)]
pub struct VlanPassReport {
    pub devices_polled: usize,
    pub devices_failed: usize,
    /// Membership rows written.
    pub synced: usize,
    /// Discovered ports that matched no known interface.
    pub skipped: usize,
    pub removed: u64,
    pub changes: Vec<MembershipChange>,
}

/// Per-pass outcomes of one cycle. `None` means the pass was not selected.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub node: Option<Result<NodePassReport>>,
    pub interface: Option<Result<InterfacePassReport>>,
    pub vlan: Option<Result<VlanPassReport>>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.node.as_ref().map_or(true, |r| r.is_ok())
            && self.interface.as_ref().map_or(true, |r| r.is_ok())
            && self.vlan.as_ref().map_or(true, |r| r.is_ok())
    }
}

// ── Engine ───────────────────────────────────────────────────────

pub struct ReconciliationEngine {
    inventory: Arc<dyn InventorySource>,
    store: Arc<dyn CanonicalStore>,
    notifier: Arc<dyn ChangeNotifier>,
    poller: Arc<UsagePoller>,
    walker: Arc<VlanWalker>,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        config: &DiscoverConfig,
        inventory: Arc<dyn InventorySource>,
        store: Arc<dyn CanonicalStore>,
        notifier: Arc<dyn ChangeNotifier>,
        connector: Arc<dyn SnmpConnector>,
    ) -> Result<Self> {
        let poller = UsagePoller::new(
            connector.clone(),
            config.session_options(),
            config.storage_walk_options(),
        );
        let walker = VlanWalker::new(
            connector,
            config.session_options(),
            config.vlan_deadline(),
            config.pvid_port_slots,
        );
        Ok(Self {
            inventory,
            store,
            notifier,
            poller: Arc::new(poller),
            walker: Arc::new(walker),
            settings: EngineSettings::from_config(config)?,
        })
    }

    /// Run the selected passes in order: node, interface, VLAN.
    pub async fn run_cycle(&self, pass: Pass) -> CycleReport {
        let mut report = CycleReport::default();
        if pass.includes(Pass::Node) {
            report.node = Some(self.run_node_pass().await);
        }
        if pass.includes(Pass::Interface) {
            report.interface = Some(self.run_interface_pass().await);
        }
        if pass.includes(Pass::Vlan) {
            report.vlan = Some(self.run_vlan_pass().await);
        }
        report
    }

    // ── Node pass ────────────────────────────────────────────────

    pub async fn run_node_pass(&self) -> Result<NodePassReport> {
        let started = Instant::now();
        let devices = self.inventory.fetch_devices().await?;
        let prior: HashMap<String, OperStatus> = self
            .store
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| (n.ip, n.status))
            .collect();

        let mut report = NodePassReport {
            devices_seen: devices.len(),
            ..Default::default()
        };

        let nodes: Vec<NetNode> = devices
            .iter()
            .filter_map(|device| {
                let node = node_from_device(device).filter(|n| self.settings.is_managed(&n.ip));
                if node.is_none() {
                    report.devices_skipped += 1;
                }
                node
            })
            .collect();

        let poller = self.poller.clone();
        let store = self.store.clone();
        let deadline = self.settings.usage_deadline;
        let mut outcomes = run_bounded(self.settings.max_concurrent_devices, nodes, move |node| {
            let poller = poller.clone();
            let store = store.clone();
            async move { reconcile_node(poller, store, deadline, node).await }
        })
        .await;

        outcomes.sort_by(|a, b| a.node.ip.cmp(&b.node.ip));
        for outcome in outcomes {
            report.polled += usize::from(outcome.polled);
            report.usage_failures += usize::from(outcome.usage_failed);
            if outcome.stored {
                report.upserted += 1;
            } else {
                report.store_failures += 1;
            }
            let node = &outcome.node;
            report.changes.extend(StatusChange::between(
                ChangeKind::Node,
                node.display_name(),
                prior.get(&node.ip).copied(),
                node.status,
            ));
        }

        if !report.changes.is_empty() {
            self.notifier.notify(&report.changes).await;
        }

        tracing::info!(
            devices = report.devices_seen,
            skipped = report.devices_skipped,
            polled = report.polled,
            usage_failures = report.usage_failures,
            upserted = report.upserted,
            changes = report.changes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Node pass complete"
        );
        Ok(report)
    }

    // ── Interface pass ───────────────────────────────────────────

    pub async fn run_interface_pass(&self) -> Result<InterfacePassReport> {
        let started = Instant::now();
        let devices = self.inventory.fetch_devices().await?;
        let sensors = self.inventory.fetch_sensors().await?;
        let stored_nodes: HashSet<NodeId> = self
            .store
            .list_nodes()
            .await?
            .into_iter()
            .map(|n| n.id)
            .collect();
        let mut report = InterfacePassReport::default();

        for device in &devices {
            let Some(node) = node_from_device(device).filter(|n| self.settings.is_managed(&n.ip))
            else {
                continue;
            };
            if !stored_nodes.contains(&node.id) {
                tracing::warn!(ip = %node.ip, "Node not stored yet, skipping its interfaces");
                report.nodes_unknown += 1;
                continue;
            }
            let stored = self.store.list_interfaces(&node.id).await?;

            if !node.status.is_up() {
                report.nodes_down += 1;
                report.interfaces_forced_down += self.store.mark_interfaces_down(&node.id).await?;
                for iface in &stored {
                    report.changes.extend(StatusChange::between(
                        ChangeKind::Interface,
                        format!("{} {}", node.display_name(), iface.name),
                        Some(iface.status),
                        OperStatus::Down,
                    ));
                }
                continue;
            }

            let prior: HashMap<u32, OperStatus> =
                stored.iter().map(|i| (i.if_index, i.status)).collect();

            report.nodes_up += 1;
            let ports = self.inventory.fetch_ports(device).await?;
            let device_sensors: Vec<_> = sensors
                .iter()
                .filter(|s| s.device_id.is_some() && s.device_id == device.id)
                .cloned()
                .collect();
            let port_names: Vec<String> = ports.iter().map(|p| p.name()).collect();
            let optics = join_optics(port_names.iter().map(String::as_str), &device_sensors);

            for (port, name) in ports.iter().zip(port_names) {
                let mut iface = Interface::new(&node.id, port.if_index, name);
                iface.description = port.if_alias.clone().filter(|a| !a.trim().is_empty());
                iface.status = port.oper_status;
                if let Some(reading) = optics.get(&iface.name) {
                    iface.optical_tx_dbm = reading.tx_dbm;
                    iface.optical_rx_dbm = reading.rx_dbm;
                }

                self.store.upsert_interface(&iface).await?;
                report.interfaces_upserted += 1;
                report.changes.extend(StatusChange::between(
                    ChangeKind::Interface,
                    format!("{} {}", node.display_name(), iface.name),
                    prior.get(&iface.if_index).copied(),
                    iface.status,
                ));
            }
        }

        if !report.changes.is_empty() {
            self.notifier.notify(&report.changes).await;
        }

        tracing::info!(
            nodes_up = report.nodes_up,
            nodes_down = report.nodes_down,
            nodes_unknown = report.nodes_unknown,
            upserted = report.interfaces_upserted,
            forced_down = report.interfaces_forced_down,
            changes = report.changes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Interface pass complete"
        );
        Ok(report)
    }

    // ── VLAN pass ────────────────────────────────────────────────

    pub async fn run_vlan_pass(&self) -> Result<VlanPassReport> {
        let started = Instant::now();
        let nodes: Vec<NetNode> = self
            .store
            .list_nodes()
            .await?
            .into_iter()
            .filter(|n| n.status.is_up() && n.snmp_community().is_some())
            .filter(|n| self.settings.is_managed(&n.ip))
            .collect();

        let walker = self.walker.clone();
        let store = self.store.clone();
        let prune = self.settings.prune_vlan_memberships;
        let outcomes = run_bounded(self.settings.max_concurrent_devices, nodes, move |node| {
            let walker = walker.clone();
            let store = store.clone();
            async move { reconcile_vlans(walker, store, prune, node).await }
        })
        .await;

        let mut report = VlanPassReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(device) => {
                    report.devices_polled += 1;
                    report.synced += device.synced;
                    report.skipped += device.skipped;
                    report.removed += device.removed;
                    report.changes.extend(device.changes);
                }
                Err(e) => {
                    report.devices_failed += 1;
                    tracing::warn!(error = %e, "VLAN sync failed for device");
                }
            }
        }
        report
            .changes
            .sort_by(|a, b| (&a.node_ip, a.membership.key()).cmp(&(&b.node_ip, b.membership.key())));

        tracing::info!(
            devices = report.devices_polled,
            failed = report.devices_failed,
            synced = report.synced,
            skipped = report.skipped,
            removed = report.removed,
            changes = report.changes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "VLAN pass complete"
        );
        Ok(report)
    }
}

// ── Per-device work ──────────────────────────────────────────────

struct NodeOutcome {
    node: NetNode,
    polled: bool,
    usage_failed: bool,
    stored: bool,
}

async fn reconcile_node(
    poller: Arc<UsagePoller>,
    store: Arc<dyn CanonicalStore>,
    deadline: Duration,
    mut node: NetNode,
) -> NodeOutcome {
    let mut polled = false;
    let mut usage_failed = false;

    if let Some(community) = node.snmp_community().filter(|_| node.status.is_up()) {
        polled = true;
        let target = SnmpTarget::new(node.ip.clone(), community);
        let (cpu, ram, failed) = poll_usage(&poller, &target, node.vendor, deadline).await;
        node.cpu_percent = cpu;
        node.ram_percent = ram;
        usage_failed = failed;
    }

    let stored = match store.upsert_node(&node).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(ip = %node.ip, error = %e, "Failed to upsert node");
            false
        }
    };

    NodeOutcome {
        node,
        polled,
        usage_failed,
        stored,
    }
}

/// CPU then RAM, sequentially, under one deadline. Returns (cpu, ram, failed).
async fn poll_usage(
    poller: &UsagePoller,
    target: &SnmpTarget,
    vendor: Vendor,
    deadline: Duration,
) -> (Option<f64>, Option<f64>, bool) {
    let sequence = async {
        let mut failed = false;
        let cpu = poller
            .fetch_cpu_usage(target, vendor)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(ip = %target.ip, vendor = %vendor, error = %e, "CPU poll failed");
                failed = true;
                None
            });
        let ram = poller
            .fetch_ram_usage(target, vendor)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(ip = %target.ip, vendor = %vendor, error = %e, "RAM poll failed");
                failed = true;
                None
            });
        (cpu, ram, failed)
    };

    match tokio::time::timeout(deadline, sequence).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                ip = %target.ip,
                deadline_ms = deadline.as_millis() as u64,
                "Usage poll deadline expired"
            );
            (None, None, true)
        }
    }
}

#[derive(Default)]
struct DeviceVlanOutcome {
    synced: usize,
    skipped: usize,
    removed: u64,
    changes: Vec<MembershipChange>,
}

async fn reconcile_vlans(
    walker: Arc<VlanWalker>,
    store: Arc<dyn CanonicalStore>,
    prune: bool,
    node: NetNode,
) -> Result<DeviceVlanOutcome> {
    let community = node.snmp_community().unwrap_or_default();
    let target = SnmpTarget::new(node.ip.clone(), community);

    let interfaces = store.list_interfaces(&node.id).await?;
    let known: BTreeMap<u32, String> = interfaces
        .iter()
        .map(|i| (i.if_index, i.name.clone()))
        .collect();
    let entries = walker.discover_vlans(&target, node.vendor, &known).await?;

    let prior: HashMap<MembershipKey, VlanMembership> = store
        .list_vlan_memberships(&node.id)
        .await?
        .into_iter()
        .map(|m| (m.key(), m))
        .collect();

    let (memberships, skipped) = memberships_for(&node.id, &interfaces, &entries);
    let mut outcome = DeviceVlanOutcome {
        skipped,
        ..Default::default()
    };

    for membership in &memberships {
        store.upsert_vlan_membership(membership).await?;
        outcome.synced += 1;

        let kind = match prior.get(&membership.key()) {
            None => Some(MembershipChangeKind::Added),
            Some(old) if old.tagged != membership.tagged => Some(MembershipChangeKind::TaggingChanged),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            outcome.changes.push(MembershipChange {
                kind,
                node_ip: node.ip.clone(),
                membership: membership.clone(),
            });
        }
    }

    // An empty discovery is indistinguishable from a failed walk, so it never prunes.
    if prune && !memberships.is_empty() {
        let current: Vec<MembershipKey> = memberships.iter().map(VlanMembership::key).collect();
        let stale: Vec<&VlanMembership> = prior
            .values()
            .filter(|m| !current.contains(&m.key()))
            .collect();
        if !stale.is_empty() {
            let keys: Vec<MembershipKey> = stale.iter().map(|m| m.key()).collect();
            outcome.removed = store.remove_vlan_memberships(&keys).await?;
            outcome
                .changes
                .extend(stale.into_iter().map(|m| MembershipChange {
                    kind: MembershipChangeKind::Removed,
                    node_ip: node.ip.clone(),
                    membership: m.clone(),
                }));
        }
    }

    if skipped > 0 {
        tracing::debug!(ip = %node.ip, skipped, "Ports without a known interface");
    }
    Ok(outcome)
}

/// Map discovered port names onto known interfaces. Returns rows and skip count.
fn memberships_for(
    node_id: &NodeId,
    interfaces: &[Interface],
    entries: &[VlanEntry],
) -> (Vec<VlanMembership>, usize) {
    let by_name: HashMap<&str, &Interface> =
        interfaces.iter().map(|i| (i.name.as_str(), i)).collect();
    let mut rows = Vec::new();
    let mut skipped = 0;

    for entry in entries {
        let ports = entry
            .untagged_ports
            .iter()
            .map(|p| (p, false))
            .chain(entry.tagged_ports.iter().map(|p| (p, true)));
        for (port, tagged) in ports {
            let Some(iface) = by_name.get(port.as_str()) else {
                skipped += 1;
                continue;
            };
            rows.push(VlanMembership {
                node_id: node_id.clone(),
                vlan_id: entry.vlan_id,
                interface_id: iface.id.clone(),
                interface_name: iface.name.clone(),
                tagged,
                vlan_name: entry.name.clone(),
            });
        }
    }
    (rows, skipped)
}

fn node_from_device(device: &InventoryDevice) -> Option<NetNode> {
    let ip = device.management_ip()?;
    let vendor = classify_device(device.os.as_deref(), device.sys_descr.as_deref());
    let mut node = NetNode::new(ip, vendor, device.status);
    node.hostname = device.hostname.clone().filter(|h| !h.trim().is_empty());
    node.community = device.community.clone();
    node.inventory_id = device.id;
    Some(node)
}

/// Run `work` over `items` with at most `limit` in flight.
async fn run_bounded<I, T, F, Fut>(limit: usize, items: Vec<I>, work: F) -> Vec<T>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    for item in items {
        let semaphore = semaphore.clone();
        let job = work(item);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            job.await
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!(error = %e, "Device task panicked"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_core::InterfaceId;

    #[test]
    fn test_memberships_skip_unknown_ports() {
        let node_id = NodeId::for_ip("10.0.0.1");
        let interfaces = vec![
            Interface::new(&node_id, 2, "ether2"),
            Interface::new(&node_id, 3, "ether3"),
        ];
        let entries = vec![VlanEntry {
            vlan_id: 117,
            name: Some("cctv".to_string()),
            tagged_ports: vec!["ether3".to_string(), "port-9".to_string()],
            untagged_ports: vec!["ether2".to_string()],
        }];

        let (rows, skipped) = memberships_for(&node_id, &interfaces, &entries);
        assert_eq!(skipped, 1);
        assert_eq!(rows.len(), 2);
        assert!(!rows[0].tagged);
        assert_eq!(rows[0].interface_id, InterfaceId::for_port(&node_id, 2));
        assert!(rows[1].tagged);
        assert_eq!(rows[1].vlan_name.as_deref(), Some("cctv"));
    }

    #[test]
    fn test_managed_subnets() {
        let config = DiscoverConfig {
            managed_subnets: vec!["10.0.0.0/24".to_string()],
            ..DiscoverConfig::default()
        };
        let settings = EngineSettings::from_config(&config).unwrap();
        assert!(settings.is_managed("10.0.0.7"));
        assert!(!settings.is_managed("10.0.1.7"));
        assert!(!settings.is_managed("core-sw.example"));

        let bad = DiscoverConfig {
            managed_subnets: vec!["10.0.0.0/33".to_string()],
            ..DiscoverConfig::default()
        };
        assert!(matches!(
            EngineSettings::from_config(&bad),
            Err(DiscoverError::Config(_))
        ));
    }

    #[test]
    fn test_node_from_device() {
        let device: InventoryDevice = serde_json::from_str(
            r#"{"device_id":3,"hostname":"","ip":"10.0.0.9","os":"linux","sysDescr":"RouterOS","status":true,"community":"public"}"#,
        )
        .unwrap();
        let node = node_from_device(&device).unwrap();
        assert_eq!(node.vendor, Vendor::Mikrotik);
        assert_eq!(node.hostname, None);
        assert_eq!(node.inventory_id, Some(3));
        assert_eq!(node.status, OperStatus::Up);
    }

    #[tokio::test]
    async fn test_run_bounded_limits_concurrency() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = run_bounded(2, (0..6).collect::<Vec<u32>>(), |i| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                i
            }
        })
        .await;

        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
