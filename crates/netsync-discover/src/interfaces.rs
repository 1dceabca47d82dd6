//! Interface enumeration from IF-MIB.

use std::collections::BTreeMap;

use crate::snmp::{walk_column, SnmpSession, SnmpValue};

const IF_DESCR: &str = "1.3.6.1.2.1.2.2.1.2";
const IF_PHYS_ADDRESS: &str = "1.3.6.1.2.1.2.2.1.6";
const IF_NAME: &str = "1.3.6.1.2.1.31.1.1.1.1";

/// One interface as seen over SNMP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpInterface {
    pub if_index: u32,
    pub name: String,
    /// Lowercase colon-separated MAC, when the agent reports one.
    pub phys_address: Option<String>,
}

/// ifIndex → interface, preferring ifName over ifDescr.
///
/// Each column is walked independently; a failed walk is logged and
/// contributes nothing.
pub async fn enumerate_interfaces(session: &dyn SnmpSession) -> BTreeMap<u32, SnmpInterface> {
    let descr = column_or_empty(session, IF_DESCR).await;
    let names = column_or_empty(session, IF_NAME).await;
    let macs = column_or_empty(session, IF_PHYS_ADDRESS).await;

    let mut interfaces = BTreeMap::new();
    for (index, value) in descr.iter().chain(names.iter()) {
        let Ok(if_index) = index.parse::<u32>() else {
            continue;
        };
        let Some(name) = value.as_text().filter(|n| !n.is_empty()) else {
            continue;
        };
        // ifName entries come second and overwrite ifDescr.
        interfaces
            .entry(if_index)
            .or_insert_with(|| SnmpInterface {
                if_index,
                name: String::new(),
                phys_address: None,
            })
            .name = name;
    }

    for (index, value) in &macs {
        let Ok(if_index) = index.parse::<u32>() else {
            continue;
        };
        if let Some(iface) = interfaces.get_mut(&if_index) {
            iface.phys_address = value.as_bytes().and_then(format_mac);
        }
    }

    interfaces
}

async fn column_or_empty(session: &dyn SnmpSession, oid: &str) -> BTreeMap<String, SnmpValue> {
    match walk_column(session, oid).await {
        Ok(column) => column,
        Err(e) => {
            tracing::warn!(oid, error = %e, "Interface column walk failed");
            BTreeMap::new()
        }
    }
}

/// Six raw bytes as `aa:bb:cc:dd:ee:ff`. Anything else is not a MAC.
pub fn format_mac(bytes: &[u8]) -> Option<String> {
    if bytes.len() != 6 || bytes.iter().all(|b| *b == 0) {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}
