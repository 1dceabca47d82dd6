//! netsync-discover: SNMP topology and VLAN reconciliation.
//!
//! Polls devices listed by the inventory source over SNMP, decodes their
//! vendor-specific usage and VLAN tables, and reconciles the result into the
//! canonical store, reporting status transitions to a notifier.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod inventory;
pub mod notify;
pub mod port_index;
pub mod reconcile;
pub mod scheduler;
pub mod snmp;
#[cfg(feature = "snmp")]
pub mod snmp_client;
pub mod usage;
pub mod vendor;
pub mod vlan;
