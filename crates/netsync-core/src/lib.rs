//! netsync-core: Shared types, change events, and the canonical store boundary.
//!
//! This crate provides the foundational types used across all netsync components:
//! - Node, Interface and VlanMembership records keyed by their natural keys
//! - Status transition and membership change records
//! - The `CanonicalStore` trait plus an in-memory implementation
//! - Common error types

pub mod error;
pub mod events;
pub mod store;
pub mod types;

pub use error::NetsyncError;
pub use events::{ChangeKind, MembershipChange, MembershipChangeKind, StatusChange};
pub use store::{CanonicalStore, MemoryStore};
pub use types::{
    is_excluded_vlan, Interface, InterfaceId, MembershipKey, NetNode, NodeId, OperStatus, Vendor,
    VlanMembership, EXCLUDED_VLAN_IDS,
};
