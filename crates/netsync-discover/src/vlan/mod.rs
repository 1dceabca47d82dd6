//! VLAN membership discovery.
//!
//! One SNMP session per device walks the vendor's VLAN tables under a single
//! overall deadline. Individual table reads that fail are logged and treated
//! as empty; expiry of the deadline closes the session and yields no VLANs.

mod bridge;
mod huawei;
mod mikrotik;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use netsync_core::{is_excluded_vlan, Vendor};

use crate::port_index::resolve_interface_name;
use crate::snmp::{SessionGuard, SessionOptions, SnmpConnector, SnmpError, SnmpSession, SnmpTarget};
use crate::vendor::{VendorProfile, VlanStrategy};

pub use bridge::bitmap_ports;

/// Ports participating in one VLAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlanEntry {
    pub vlan_id: u16,
    pub name: Option<String>,
    pub tagged_ports: Vec<String>,
    pub untagged_ports: Vec<String>,
}

impl VlanEntry {
    fn new(vlan_id: u16) -> Self {
        Self {
            vlan_id,
            name: None,
            tagged_ports: Vec::new(),
            untagged_ports: Vec::new(),
        }
    }
}

/// Collects memberships while tables are parsed.
///
/// Excluded and out-of-range VLAN ids are dropped on insert. A port that is
/// untagged in a VLAN is never also reported as tagged there.
#[derive(Debug, Default)]
pub struct VlanAccumulator {
    vlans: BTreeMap<u16, VlanEntry>,
}

/// Usable VLAN id that is not policy-excluded.
fn accepts_vlan(vlan_id: u16) -> bool {
    (1..=4094).contains(&vlan_id) && !is_excluded_vlan(vlan_id)
}

impl VlanAccumulator {
    fn entry(&mut self, vlan_id: u16) -> Option<&mut VlanEntry> {
        if !accepts_vlan(vlan_id) {
            return None;
        }
        Some(
            self.vlans
                .entry(vlan_id)
                .or_insert_with(|| VlanEntry::new(vlan_id)),
        )
    }

    pub fn add_tagged(&mut self, vlan_id: u16, port: impl Into<String>) {
        if let Some(entry) = self.entry(vlan_id) {
            entry.tagged_ports.push(port.into());
        }
    }

    pub fn add_untagged(&mut self, vlan_id: u16, port: impl Into<String>) {
        if let Some(entry) = self.entry(vlan_id) {
            entry.untagged_ports.push(port.into());
        }
    }

    pub fn set_name(&mut self, vlan_id: u16, name: Option<String>) {
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            return;
        };
        if let Some(entry) = self.entry(vlan_id) {
            entry.name = Some(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vlans.is_empty()
    }

    pub fn finish(self) -> Vec<VlanEntry> {
        self.vlans
            .into_values()
            .map(|mut entry| {
                entry.untagged_ports.sort();
                entry.untagged_ports.dedup();
                entry.tagged_ports.sort();
                entry.tagged_ports.dedup();
                let untagged = &entry.untagged_ports;
                entry.tagged_ports.retain(|p| !untagged.contains(p));
                entry
            })
            .collect()
    }
}

/// Names bridge ports, preferring dot1dBasePortIfIndex over index guessing.
#[derive(Debug, Clone, Default)]
pub(crate) struct PortNames {
    pub(crate) known: BTreeMap<u32, String>,
    pub(crate) base_ports: BTreeMap<u32, u32>,
}

impl PortNames {
    pub(crate) fn new(known: &BTreeMap<u32, String>) -> Self {
        Self {
            known: known.clone(),
            base_ports: BTreeMap::new(),
        }
    }

    pub(crate) fn name(&self, port: u32) -> String {
        self.base_ports
            .get(&port)
            .and_then(|if_index| self.known.get(if_index))
            .cloned()
            .unwrap_or_else(|| resolve_interface_name(port, &self.known))
    }
}

/// Parse a VLAN id column value or index component.
pub(crate) fn parse_vlan_id(raw: &str) -> Option<u16> {
    raw.parse::<u16>().ok()
}

/// Drives per-vendor VLAN table walks for one device at a time.
pub struct VlanWalker {
    connector: Arc<dyn SnmpConnector>,
    options: SessionOptions,
    deadline: Duration,
    pvid_port_slots: u32,
}

impl VlanWalker {
    pub fn new(
        connector: Arc<dyn SnmpConnector>,
        options: SessionOptions,
        deadline: Duration,
        pvid_port_slots: u32,
    ) -> Self {
        Self {
            connector,
            options,
            deadline,
            pvid_port_slots,
        }
    }

    /// Discover VLAN memberships of one device.
    ///
    /// `known` maps persisted ifIndex to interface name. Only a failure to
    /// open the session is an error; an expired deadline yields an empty list.
    pub async fn discover_vlans(
        &self,
        target: &SnmpTarget,
        vendor: Vendor,
        known: &BTreeMap<u32, String>,
    ) -> Result<Vec<VlanEntry>, SnmpError> {
        let started = Instant::now();
        let guard = SessionGuard::new(self.connector.open(target, &self.options).await?, target);

        let walk = walk_vendor(
            vendor.vlan_strategy(),
            guard.session(),
            known,
            self.pvid_port_slots,
        );
        let result = tokio::time::timeout(self.deadline, walk).await;
        guard.close();

        match result {
            Ok(entries) => {
                tracing::debug!(
                    ip = %target.ip,
                    vendor = %vendor,
                    vlan_count = entries.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "VLAN discovery complete"
                );
                Ok(entries)
            }
            Err(_) => {
                tracing::warn!(
                    ip = %target.ip,
                    vendor = %vendor,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "VLAN discovery deadline expired"
                );
                Ok(Vec::new())
            }
        }
    }
}

async fn walk_vendor(
    strategy: VlanStrategy,
    session: &dyn SnmpSession,
    known: &BTreeMap<u32, String>,
    pvid_port_slots: u32,
) -> Vec<VlanEntry> {
    match strategy {
        VlanStrategy::MikrotikBridge => mikrotik::discover(session, known, pvid_port_slots).await,
        VlanStrategy::HuaweiL2Vlan => huawei::discover(session, known).await,
        VlanStrategy::QBridge => bridge::discover(session, known).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_excludes_policy_vlans() {
        let mut acc = VlanAccumulator::default();
        acc.add_tagged(1, "ether1");
        acc.add_untagged(99, "ether2");
        acc.add_tagged(0, "ether3");
        acc.add_tagged(4095, "ether3");
        assert!(acc.is_empty());

        acc.add_tagged(117, "ether4");
        let entries = acc.finish();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].vlan_id, 117);
    }

    #[test]
    fn test_untagged_port_is_not_tagged() {
        let mut acc = VlanAccumulator::default();
        acc.add_tagged(10, "sfp1");
        acc.add_tagged(10, "sfp2");
        acc.add_tagged(10, "sfp2");
        acc.add_untagged(10, "sfp1");
        acc.set_name(10, Some("mgmt".to_string()));

        let entries = acc.finish();
        assert_eq!(entries[0].tagged_ports, vec!["sfp2"]);
        assert_eq!(entries[0].untagged_ports, vec!["sfp1"]);
        assert_eq!(entries[0].name.as_deref(), Some("mgmt"));
    }

    #[test]
    fn test_port_names_prefer_base_port_map() {
        let known = BTreeMap::from([(3, "ge-0/0/2".to_string()), (10, "ge-0/0/9".to_string())]);
        let mut names = PortNames::new(&known);
        names.base_ports.insert(2, 10);
        assert_eq!(names.name(2), "ge-0/0/9");
        assert_eq!(names.name(3), "ge-0/0/2");
        assert_eq!(names.name(7), "port-7");
    }
}
