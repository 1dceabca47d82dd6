//! MikroTik RouterOS bridge VLANs.
//!
//! RouterOS exposes untagged membership through the dot1qPvid column and
//! tagged membership only indirectly through the MAC forwarding table. When a
//! learned MAC does not belong to one of the device's own interfaces, every
//! physical-looking interface is reported as a tagged member of that VLAN.

use std::collections::BTreeMap;

use crate::interfaces::enumerate_interfaces;
use crate::port_index::resolve_interface_name;
use crate::snmp::{walk_column, SnmpSession, SnmpValue};

use super::bridge::table_or_empty;
use super::{parse_vlan_id, VlanAccumulator, VlanEntry};

const DOT1Q_PVID: &str = "1.3.6.1.2.1.17.7.1.4.5.1.1";
const DOT1Q_TP_FDB_PORT: &str = "1.3.6.1.2.1.17.7.1.2.2.1.2";
const BRIDGE_VLAN_TABLE: &str = "1.3.6.1.4.1.14988.1.1.20.1";

// bridge VLAN table columns
const BV_PORT: u32 = 2;
const BV_VLAN: u32 = 3;
const BV_TYPE: u32 = 4;
const BV_STATUS: u32 = 5;

const PORT_TYPE_UNTAGGED: i64 = 1;
const PORT_TYPE_TAGGED: i64 = 2;

const PHYSICAL_MARKERS: &[&str] = &["sfp", "ether", "bridge"];

pub(crate) async fn discover(
    session: &dyn SnmpSession,
    known: &BTreeMap<u32, String>,
    pvid_port_slots: u32,
) -> Vec<VlanEntry> {
    let snmp_interfaces = enumerate_interfaces(session).await;

    let mut names = known.clone();
    for (if_index, iface) in &snmp_interfaces {
        names
            .entry(*if_index)
            .or_insert_with(|| iface.name.clone());
    }
    let by_mac: BTreeMap<&str, &str> = snmp_interfaces
        .iter()
        .filter_map(|(if_index, iface)| {
            let mac = iface.phys_address.as_deref()?;
            Some((mac, names.get(if_index)?.as_str()))
        })
        .collect();

    let pvids = fetch_pvids(session, pvid_port_slots).await;
    let mut acc = VlanAccumulator::default();

    for (vlan_id, mac) in fdb_cells(session).await {
        match by_mac.get(mac.as_str()) {
            Some(name) => acc.add_tagged(vlan_id, *name),
            None => {
                for name in names.values().filter(|n| looks_physical(n)) {
                    acc.add_tagged(vlan_id, name.as_str());
                }
            }
        }
    }

    // Gated on the forwarding table alone; PVID entries are added afterwards.
    if acc.is_empty() {
        tracing::debug!("No VLANs in the forwarding table, reading bridge VLAN table");
        static_table(session, &names, &mut acc).await;
    }

    for (port, vlan_id) in &pvids {
        acc.add_untagged(*vlan_id, resolve_interface_name(*port, &names));
    }

    acc.finish()
}

/// portIndex → PVID for each polled slot. PVIDs of 0 or 1 mean no override.
async fn fetch_pvids(session: &dyn SnmpSession, slots: u32) -> BTreeMap<u32, u16> {
    let oids: Vec<String> = (1..=slots).map(|p| format!("{DOT1Q_PVID}.{p}")).collect();
    if oids.is_empty() {
        return BTreeMap::new();
    }

    match session.get(&oids).await {
        Ok(varbinds) => varbinds
            .into_iter()
            .filter(|vb| !vb.value.is_exception())
            .filter_map(|vb| {
                let port = vb.oid.rsplit('.').next()?.parse::<u32>().ok()?;
                let pvid = vb.value.as_i64()?;
                if pvid <= 1 {
                    return None;
                }
                Some((port, u16::try_from(pvid).ok()?))
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "dot1qPvid GET failed");
            BTreeMap::new()
        }
    }
}

/// (VLAN, MAC) pairs from the forwarding table index `vlan.m1.m2.m3.m4.m5.m6`.
async fn fdb_cells(session: &dyn SnmpSession) -> Vec<(u16, String)> {
    let column = match walk_column(session, DOT1Q_TP_FDB_PORT).await {
        Ok(column) => column,
        Err(e) => {
            tracing::warn!(error = %e, "dot1qTpFdbPort walk failed");
            return Vec::new();
        }
    };

    column
        .keys()
        .filter_map(|index| {
            let mut parts = index.split('.');
            let vlan_id = parse_vlan_id(parts.next()?)?;
            let octets = parts
                .map(|p| p.parse::<u8>().ok())
                .collect::<Option<Vec<u8>>>()?;
            if octets.len() != 6 {
                return None;
            }
            let mac = octets
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<Vec<_>>()
                .join(":");
            Some((vlan_id, mac))
        })
        .collect()
}

async fn static_table(
    session: &dyn SnmpSession,
    names: &BTreeMap<u32, String>,
    acc: &mut VlanAccumulator,
) {
    let table = table_or_empty(session, BRIDGE_VLAN_TABLE).await;
    for row in table.values() {
        if !row.get(&BV_STATUS).is_some_and(is_active) {
            continue;
        }
        let port = row
            .get(&BV_PORT)
            .and_then(SnmpValue::as_i64)
            .and_then(|p| u32::try_from(p).ok());
        let vlan_id = row
            .get(&BV_VLAN)
            .and_then(SnmpValue::as_i64)
            .and_then(|v| u16::try_from(v).ok());
        let (Some(port), Some(vlan_id)) = (port, vlan_id) else {
            continue;
        };

        let name = resolve_interface_name(port, names);
        match row.get(&BV_TYPE).and_then(SnmpValue::as_i64) {
            Some(PORT_TYPE_UNTAGGED) => acc.add_untagged(vlan_id, name),
            Some(PORT_TYPE_TAGGED) => acc.add_tagged(vlan_id, name),
            _ => {}
        }
    }
}

fn is_active(status: &SnmpValue) -> bool {
    match status {
        SnmpValue::OctetString(_) => status
            .as_text()
            .is_some_and(|s| s.eq_ignore_ascii_case("active")),
        other => other.as_i64() == Some(1),
    }
}

fn looks_physical(name: &str) -> bool {
    let lowered = name.to_lowercase();
    PHYSICAL_MARKERS.iter().any(|m| lowered.contains(m))
}
