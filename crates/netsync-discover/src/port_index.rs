//! Bridge port number → interface name resolution.
//!
//! MikroTik numbers bridge ports one below the persisted ifIndex, so the
//! off-by-one match is tried first, then the exact index.

use std::collections::BTreeMap;

/// Resolve to a known interface name, or `None` when neither convention matches.
pub fn lookup_interface_name(port: u32, known: &BTreeMap<u32, String>) -> Option<&str> {
    port.checked_add(1)
        .and_then(|next| known.get(&next))
        .or_else(|| known.get(&port))
        .map(String::as_str)
}

/// Resolve to a known interface name, falling back to `port-{port}`.
pub fn resolve_interface_name(port: u32, known: &BTreeMap<u32, String>) -> String {
    lookup_interface_name(port, known)
        .map(str::to_string)
        .unwrap_or_else(|| format!("port-{port}"))
}
