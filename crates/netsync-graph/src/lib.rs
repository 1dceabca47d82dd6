//! netsync-graph: Neo4j client for the canonical inventory store.
//!
//! This crate is the single mutation point for persisted inventory. Nodes,
//! interfaces and VLAN memberships are merged on their natural keys so a
//! sync pass can be replayed without creating duplicates.

pub mod client;
pub mod mutations;
pub mod queries;
mod store;

pub use client::{GraphClient, GraphConfig, GraphError};
