//! Error types for the netsync-discover crate.

use thiserror::Error;

use crate::inventory::InventoryError;
use crate::snmp::SnmpError;

#[derive(Error, Debug)]
pub enum DiscoverError {
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    #[error("Store error: {0}")]
    Store(#[from] netsync_core::NetsyncError),

    #[error("Graph error: {0}")]
    Graph(#[from] netsync_graph::GraphError),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DiscoverError>;
