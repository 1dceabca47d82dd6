//! Huawei VRP hwL2Vlan table, with Q-BRIDGE as the fallback.

use std::collections::BTreeMap;

use crate::snmp::SnmpSession;

use super::bridge::{self, add_bitmaps, port_names, table_or_empty};
use super::{parse_vlan_id, VlanAccumulator, VlanEntry};

const HW_L2_VLAN_TABLE: &str = "1.3.6.1.4.1.2011.5.25.42.3.1.1.1";

const HW_VLAN_DESCR: u32 = 2;
const HW_VLAN_PORT_LIST: u32 = 3;
const HW_VLAN_UNTAGGED_PORT_LIST: u32 = 4;

pub(crate) async fn discover(
    session: &dyn SnmpSession,
    known: &BTreeMap<u32, String>,
) -> Vec<VlanEntry> {
    let table = table_or_empty(session, HW_L2_VLAN_TABLE).await;
    if table.is_empty() {
        tracing::debug!("hwL2Vlan table empty, falling back to Q-BRIDGE");
        return bridge::discover(session, known).await;
    }

    let names = port_names(session, known).await;
    let mut acc = VlanAccumulator::default();
    for (index, row) in &table {
        let Some(vlan_id) = parse_vlan_id(index) else {
            continue;
        };
        acc.set_name(vlan_id, row.get(&HW_VLAN_DESCR).and_then(|v| v.as_text()));
        add_bitmaps(
            &mut acc,
            vlan_id,
            row.get(&HW_VLAN_PORT_LIST).and_then(|v| v.as_bytes()),
            row.get(&HW_VLAN_UNTAGGED_PORT_LIST).and_then(|v| v.as_bytes()),
            &names,
        );
    }
    acc.finish()
}
