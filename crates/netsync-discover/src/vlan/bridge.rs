//! Q-BRIDGE-MIB VLAN tables (generic bridges, Juniper, Cisco, HP).

use std::collections::BTreeMap;

use crate::snmp::{walk_column, walk_table, SnmpSession, SnmpTable};

use super::{parse_vlan_id, PortNames, VlanAccumulator, VlanEntry};

const DOT1D_BASE_PORT_IF_INDEX: &str = "1.3.6.1.2.1.17.1.4.1.2";
const DOT1Q_VLAN_STATIC_TABLE: &str = "1.3.6.1.2.1.17.7.1.4.3";
const DOT1Q_VLAN_CURRENT_TABLE: &str = "1.3.6.1.2.1.17.7.1.4.2";

// dot1qVlanStaticEntry columns
const STATIC_NAME: u32 = 1;
const STATIC_EGRESS: u32 = 2;
const STATIC_UNTAGGED: u32 = 4;

// dot1qVlanCurrentEntry columns, indexed by (timeMark, vlanIndex)
const CURRENT_EGRESS: u32 = 4;
const CURRENT_UNTAGGED: u32 = 5;

pub(crate) async fn discover(
    session: &dyn SnmpSession,
    known: &BTreeMap<u32, String>,
) -> Vec<VlanEntry> {
    let names = port_names(session, known).await;
    let mut acc = VlanAccumulator::default();

    let static_table = table_or_empty(session, DOT1Q_VLAN_STATIC_TABLE).await;
    for (index, row) in &static_table {
        let Some(vlan_id) = parse_vlan_id(index) else {
            continue;
        };
        acc.set_name(vlan_id, row.get(&STATIC_NAME).and_then(|v| v.as_text()));
        add_bitmaps(
            &mut acc,
            vlan_id,
            row.get(&STATIC_EGRESS).and_then(|v| v.as_bytes()),
            row.get(&STATIC_UNTAGGED).and_then(|v| v.as_bytes()),
            &names,
        );
    }

    if acc.is_empty() {
        let current = table_or_empty(session, DOT1Q_VLAN_CURRENT_TABLE).await;
        for (index, row) in &current {
            let Some(vlan_id) = index.rsplit('.').next().and_then(parse_vlan_id) else {
                continue;
            };
            add_bitmaps(
                &mut acc,
                vlan_id,
                row.get(&CURRENT_EGRESS).and_then(|v| v.as_bytes()),
                row.get(&CURRENT_UNTAGGED).and_then(|v| v.as_bytes()),
                &names,
            );
        }
    }

    acc.finish()
}

/// Egress ports not in the untagged bitmap are tagged members.
pub(crate) fn add_bitmaps(
    acc: &mut VlanAccumulator,
    vlan_id: u16,
    egress: Option<&[u8]>,
    untagged: Option<&[u8]>,
    names: &PortNames,
) {
    let untagged = untagged.map(bitmap_ports).unwrap_or_default();
    for port in &untagged {
        acc.add_untagged(vlan_id, names.name(*port));
    }
    for port in egress.map(bitmap_ports).unwrap_or_default() {
        if !untagged.contains(&port) {
            acc.add_tagged(vlan_id, names.name(port));
        }
    }
}

/// Port numbers set in a PortList bitmap (1-based, most significant bit first).
pub fn bitmap_ports(bitmap: &[u8]) -> Vec<u32> {
    bitmap
        .iter()
        .enumerate()
        .flat_map(|(byte_index, byte)| {
            (0..8u32)
                .filter(move |bit| byte & (0x80 >> bit) != 0)
                .map(move |bit| byte_index as u32 * 8 + bit + 1)
        })
        .collect()
}

pub(crate) async fn port_names(session: &dyn SnmpSession, known: &BTreeMap<u32, String>) -> PortNames {
    let mut names = PortNames::new(known);
    match walk_column(session, DOT1D_BASE_PORT_IF_INDEX).await {
        Ok(column) => {
            names.base_ports = column
                .into_iter()
                .filter_map(|(port, value)| {
                    let port = port.parse::<u32>().ok()?;
                    let if_index = u32::try_from(value.as_i64()?).ok()?;
                    Some((port, if_index))
                })
                .collect();
        }
        Err(e) => tracing::debug!(error = %e, "dot1dBasePortIfIndex walk failed"),
    }
    names
}

pub(crate) async fn table_or_empty(session: &dyn SnmpSession, table_oid: &str) -> SnmpTable {
    match walk_table(session, table_oid).await {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!(table = table_oid, error = %e, "VLAN table walk failed");
            SnmpTable::new()
        }
    }
}
