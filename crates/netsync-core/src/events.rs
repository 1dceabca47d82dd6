//! Change records produced by the reconciliation passes.
//!
//! Status transitions are handed to the notification collaborator as plain
//! `{name, previousStatus, currentStatus}` records. Membership changes stay in
//! the VLAN pass report.

use serde::{Deserialize, Serialize};

use crate::types::{OperStatus, VlanMembership};

/// What kind of entity changed status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Node,
    Interface,
}

/// An up/down transition of a node or interface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    #[serde(skip_serializing, default = "default_kind")]
    pub kind: ChangeKind,
    pub name: String,
    pub previous_status: OperStatus,
    pub current_status: OperStatus,
}

fn default_kind() -> ChangeKind {
    ChangeKind::Node
}

impl StatusChange {
    /// Returns a change record when `previous` is known and differs from `current`.
    pub fn between(
        kind: ChangeKind,
        name: impl Into<String>,
        previous: Option<OperStatus>,
        current: OperStatus,
    ) -> Option<Self> {
        match previous {
            Some(prev) if prev != current => Some(Self {
                kind,
                name: name.into(),
                previous_status: prev,
                current_status: current,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MembershipChangeKind {
    Added,
    TaggingChanged,
    Removed,
}

/// A VLAN membership row that was added, re-tagged or removed in a pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MembershipChange {
    pub kind: MembershipChangeKind,
    pub node_ip: String,
    pub membership: VlanMembership,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_change_without_prior_status() {
        assert!(StatusChange::between(ChangeKind::Node, "sw1", None, OperStatus::Up).is_none());
        assert!(StatusChange::between(
            ChangeKind::Node,
            "sw1",
            Some(OperStatus::Up),
            OperStatus::Up
        )
        .is_none());
    }

    #[test]
    fn test_transition_is_reported() {
        let change = StatusChange::between(
            ChangeKind::Interface,
            "sw1 ether1",
            Some(OperStatus::Up),
            OperStatus::Down,
        )
        .unwrap();
        assert_eq!(change.previous_status, OperStatus::Up);
        assert_eq!(change.current_status, OperStatus::Down);
    }

    #[test]
    fn test_status_change_wire_format() {
        let change = StatusChange {
            kind: ChangeKind::Node,
            name: "core-sw".to_string(),
            previous_status: OperStatus::Up,
            current_status: OperStatus::Down,
        };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(
            json,
            r#"{"name":"core-sw","previousStatus":"up","currentStatus":"down"}"#
        );
    }
}
