//! SNMP transport boundary.
//!
//! The engine never speaks BER or UDP itself. It opens one [`SnmpSession`]
//! per conversation through an [`SnmpConnector`], issues GET and subtree WALK
//! requests against known OIDs, and interprets the returned varbinds.
//! [`SessionGuard`] closes the session exactly once on every exit path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

/// Errors raised by the SNMP transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SnmpError {
    #[error("SNMP request to {target} timed out")]
    Timeout { target: String },

    #[error("SNMP transport error: {0}")]
    Transport(String),

    #[error("SNMP session already closed")]
    Closed,

    #[error("Invalid OID: {0}")]
    InvalidOid(String),
}

/// Protocol version used for community-based sessions.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

/// Decoded varbind value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// noSuchObject / noSuchInstance / endOfMibView.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::NoSuchObject | Self::NoSuchInstance | Self::EndOfMibView
        )
    }

    /// Integer view of numeric values. Octet strings holding a decimal number
    /// are accepted as well; some agents report gauges that way.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Counter32(v) | Self::Gauge32(v) | Self::TimeTicks(v) => Some(i64::from(*v)),
            Self::Counter64(v) => i64::try_from(*v).ok(),
            Self::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Text view: octet strings decoded lossily with trailing NULs stripped.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::OctetString(bytes) => Some(
                String::from_utf8_lossy(bytes)
                    .trim_end_matches('\0')
                    .trim()
                    .to_string(),
            ),
            Self::ObjectIdentifier(oid) => Some(oid.clone()),
            _ if self.is_exception() => None,
            Self::Null => None,
            other => other.as_i64().map(|v| v.to_string()),
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::OctetString(bytes) => Some(bytes),
            _ => None,
        }
    }
}

/// A single (OID, value) pair returned by an SNMP operation.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: SnmpValue) -> Self {
        Self {
            oid: normalize_oid(&oid.into()).to_string(),
            value,
        }
    }
}

/// Device address and credentials for one conversation.
#[derive(Debug, Clone)]
pub struct SnmpTarget {
    pub ip: String,
    pub port: u16,
    pub community: String,
}

impl SnmpTarget {
    pub fn new(ip: impl Into<String>, community: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: 161,
            community: community.into(),
        }
    }
}

/// Per-session transport parameters.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub timeout: Duration,
    pub retries: u32,
    pub version: SnmpVersion,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 0,
            version: SnmpVersion::V2c,
        }
    }
}

/// An open conversation with one agent.
#[async_trait]
pub trait SnmpSession: Send + Sync {
    /// Batched GET. Varbinds come back in request order; missing objects are
    /// reported as exception values, not errors.
    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SnmpError>;

    /// Subtree walk: every varbind strictly under `oid`, in lexicographic order.
    async fn walk(&self, oid: &str) -> Result<Vec<VarBind>, SnmpError>;

    /// Release the socket and any pending retransmissions.
    fn close(&self);
}

#[async_trait]
pub trait SnmpConnector: Send + Sync {
    async fn open(
        &self,
        target: &SnmpTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn SnmpSession>, SnmpError>;
}

/// Owns a session and closes it exactly once, on explicit `close()` or drop.
pub struct SessionGuard {
    session: Box<dyn SnmpSession>,
    target: String,
    closed: AtomicBool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn SnmpSession>, target: &SnmpTarget) -> Self {
        Self {
            session,
            target: target.ip.clone(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &dyn SnmpSession {
        self.session.as_ref()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.session.close();
            tracing::trace!(ip = %self.target, "SNMP session closed");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.close();
    }
}

// ── OID helpers ───────────────────────────────────────────────────

pub fn normalize_oid(oid: &str) -> &str {
    oid.trim().trim_start_matches('.')
}

/// Parse a dotted OID into its numeric components.
pub fn parse_oid(oid: &str) -> Result<Vec<u32>, SnmpError> {
    normalize_oid(oid)
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| SnmpError::InvalidOid(oid.to_string()))
        })
        .collect()
}

/// The part of `oid` below `base`, without the separating dot.
pub fn oid_suffix<'a>(base: &str, oid: &'a str) -> Option<&'a str> {
    let base = normalize_oid(base);
    let rest = normalize_oid(oid).strip_prefix(base)?;
    rest.strip_prefix('.').filter(|s| !s.is_empty())
}

/// Whether `oid` lies in the subtree rooted at `base` (inclusive).
pub fn in_subtree(base: &str, oid: &str) -> bool {
    normalize_oid(oid) == normalize_oid(base) || oid_suffix(base, oid).is_some()
}

// ── Table reshaping ───────────────────────────────────────────────

/// Rows keyed by index suffix, columns keyed by column number.
pub type SnmpTable = BTreeMap<String, BTreeMap<u32, SnmpValue>>;

/// Walk a conceptual table (`<table>.1.<column>.<index>`) and reshape it.
pub async fn walk_table(session: &dyn SnmpSession, table_oid: &str) -> Result<SnmpTable, SnmpError> {
    let entry = format!("{}.1", normalize_oid(table_oid));
    let mut table = SnmpTable::new();

    for vb in session.walk(&entry).await? {
        if vb.value.is_exception() {
            continue;
        }
        let Some(suffix) = oid_suffix(&entry, &vb.oid) else {
            continue;
        };
        let Some((column, index)) = suffix.split_once('.') else {
            continue;
        };
        let Ok(column) = column.parse::<u32>() else {
            continue;
        };
        table
            .entry(index.to_string())
            .or_default()
            .insert(column, vb.value);
    }

    Ok(table)
}

/// Walk a single column and key its values by index suffix.
pub async fn walk_column(
    session: &dyn SnmpSession,
    column_oid: &str,
) -> Result<BTreeMap<String, SnmpValue>, SnmpError> {
    Ok(session
        .walk(column_oid)
        .await?
        .into_iter()
        .filter(|vb| !vb.value.is_exception())
        .filter_map(|vb| Some((oid_suffix(column_oid, &vb.oid)?.to_string(), vb.value)))
        .collect())
}

// ── In-memory agent ───────────────────────────────────────────────

/// An in-process agent serving a fixed OID tree, used by the test suites to
/// exercise the pollers and passes without a network. Every opened session
/// shares the same tree and counters.
#[derive(Clone, Default)]
pub struct MemoryAgent {
    inner: Arc<MemoryAgentState>,
}

#[derive(Default)]
struct MemoryAgentState {
    objects: Mutex<BTreeMap<Vec<u32>, SnmpValue>>,
    failing_walks: Mutex<Vec<String>>,
    fail_gets: AtomicBool,
    latency: Mutex<Option<Duration>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    requests: AtomicUsize,
}

impl MemoryAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `value` at `oid`. Invalid OIDs are ignored.
    pub fn with(self, oid: &str, value: SnmpValue) -> Self {
        self.insert(oid, value);
        self
    }

    pub fn insert(&self, oid: &str, value: SnmpValue) {
        if let Ok(key) = parse_oid(oid) {
            if let Ok(mut objects) = self.inner.objects.lock() {
                objects.insert(key, value);
            }
        }
    }

    /// Make walks rooted inside `prefix` fail with a transport error.
    pub fn failing_walk(self, prefix: &str) -> Self {
        if let Ok(mut failing) = self.inner.failing_walks.lock() {
            failing.push(normalize_oid(prefix).to_string());
        }
        self
    }

    /// Make every GET fail with a transport error.
    pub fn failing_gets(self) -> Self {
        self.inner.fail_gets.store(true, Ordering::SeqCst);
        self
    }

    /// Delay every request by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        if let Ok(mut slot) = self.inner.latency.lock() {
            *slot = Some(latency);
        }
        self
    }

    pub fn sessions_opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of GET/WALK requests served.
    pub fn requests(&self) -> usize {
        self.inner.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnmpConnector for MemoryAgent {
    async fn open(
        &self,
        _target: &SnmpTarget,
        _options: &SessionOptions,
    ) -> Result<Box<dyn SnmpSession>, SnmpError> {
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            state: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemorySession {
    state: Arc<MemoryAgentState>,
    closed: AtomicBool,
}

impl MemorySession {
    async fn before_request(&self) -> Result<(), SnmpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SnmpError::Closed);
        }
        self.state.requests.fetch_add(1, Ordering::SeqCst);
        let latency = self.state.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SnmpSession for MemorySession {
    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SnmpError> {
        self.before_request().await?;
        if self.state.fail_gets.load(Ordering::SeqCst) {
            return Err(SnmpError::Transport("GET rejected by agent".to_string()));
        }
        let objects = self
            .state
            .objects
            .lock()
            .map_err(|e| SnmpError::Transport(e.to_string()))?;
        oids.iter()
            .map(|oid| {
                let key = parse_oid(oid)?;
                let value = objects
                    .get(&key)
                    .cloned()
                    .unwrap_or(SnmpValue::NoSuchInstance);
                Ok(VarBind::new(oid.as_str(), value))
            })
            .collect()
    }

    async fn walk(&self, oid: &str) -> Result<Vec<VarBind>, SnmpError> {
        self.before_request().await?;
        let root = normalize_oid(oid);
        let failing = self
            .state
            .failing_walks
            .lock()
            .map(|f| f.iter().any(|p| in_subtree(p, root)))
            .unwrap_or(false);
        if failing {
            return Err(SnmpError::Transport(format!("walk of {root} failed")));
        }

        let base = parse_oid(root)?;
        let objects = self
            .state
            .objects
            .lock()
            .map_err(|e| SnmpError::Transport(e.to_string()))?;
        Ok(objects
            .iter()
            .filter(|(key, _)| key.len() > base.len() && key.starts_with(&base))
            .map(|(key, value)| VarBind::new(format_oid(key), value.clone()))
            .collect())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn format_oid(parts: &[u32]) -> String {
    parts
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_requires_component_boundary() {
        assert_eq!(oid_suffix("1.3.6.1.2.1.2", "1.3.6.1.2.1.2.2.1"), Some("2.1"));
        assert_eq!(oid_suffix("1.3.6.1.2.1.2", "1.3.6.1.2.1.25.1"), None);
        assert_eq!(oid_suffix(".1.3.6", "1.3.6"), None);
        assert!(in_subtree("1.3.6", ".1.3.6"));
    }

    #[test]
    fn test_value_views() {
        assert_eq!(SnmpValue::Gauge32(42).as_i64(), Some(42));
        assert_eq!(SnmpValue::OctetString(b" 17 ".to_vec()).as_i64(), Some(17));
        assert_eq!(SnmpValue::NoSuchInstance.as_i64(), None);
        assert_eq!(
            SnmpValue::OctetString(b"ether1\0".to_vec()).as_text().as_deref(),
            Some("ether1")
        );
        assert!(SnmpValue::EndOfMibView.is_exception());
    }

    #[tokio::test]
    async fn test_walk_table_groups_columns_by_index() {
        let agent = MemoryAgent::new()
            .with("1.3.6.1.2.1.2.2.1.2.1", SnmpValue::OctetString(b"ether1".to_vec()))
            .with("1.3.6.1.2.1.2.2.1.2.2", SnmpValue::OctetString(b"ether2".to_vec()))
            .with("1.3.6.1.2.1.2.2.1.8.1", SnmpValue::Integer(1))
            .with("1.3.6.1.2.1.2.20.1", SnmpValue::Integer(9));

        let session = agent
            .open(&SnmpTarget::new("10.0.0.1", "public"), &SessionOptions::default())
            .await
            .unwrap();
        let table = walk_table(session.as_ref(), "1.3.6.1.2.1.2.2").await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table["1"][&2], SnmpValue::OctetString(b"ether1".to_vec()));
        assert_eq!(table["1"][&8], SnmpValue::Integer(1));
        assert!(!table["2"].contains_key(&8));
    }

    #[tokio::test]
    async fn test_walk_is_ordered_numerically() {
        let agent = MemoryAgent::new()
            .with("1.3.6.1.2.1.31.1.1.1.1.10", SnmpValue::Integer(10))
            .with("1.3.6.1.2.1.31.1.1.1.1.9", SnmpValue::Integer(9));
        let session = agent
            .open(&SnmpTarget::new("10.0.0.1", "public"), &SessionOptions::default())
            .await
            .unwrap();
        let vbs = session.walk("1.3.6.1.2.1.31.1.1.1.1").await.unwrap();
        assert_eq!(vbs[0].oid, "1.3.6.1.2.1.31.1.1.1.1.9");
        assert_eq!(vbs[1].oid, "1.3.6.1.2.1.31.1.1.1.1.10");
    }

    #[tokio::test]
    async fn test_guard_closes_once() {
        let agent = MemoryAgent::new();
        let target = SnmpTarget::new("10.0.0.1", "public");
        let session = agent.open(&target, &SessionOptions::default()).await.unwrap();
        let guard = SessionGuard::new(session, &target);
        guard.close();
        guard.close();
        drop(guard);
        assert_eq!(agent.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_sessions_share_tree_and_counters() {
        let agent = MemoryAgent::new();
        let target = SnmpTarget::new("10.0.0.1", "public");
        let first = agent.open(&target, &SessionOptions::default()).await.unwrap();
        let second = agent.open(&target, &SessionOptions::default()).await.unwrap();
        agent.insert("1.3.6.1.2.1.1.5.0", SnmpValue::OctetString(b"core-sw".to_vec()));

        let vbs = second.get(&["1.3.6.1.2.1.1.5.0".to_string()]).await.unwrap();
        assert_eq!(vbs[0].value.as_text().as_deref(), Some("core-sw"));
        first.close();
        second.close();
        assert_eq!(agent.sessions_opened(), 2);
        assert_eq!(agent.sessions_closed(), 2);
        assert_eq!(agent.requests(), 1);
    }

    #[tokio::test]
    async fn test_missing_objects_are_exceptions() {
        let agent = MemoryAgent::new();
        let session = agent
            .open(&SnmpTarget::new("10.0.0.1", "public"), &SessionOptions::default())
            .await
            .unwrap();
        let vbs = session.get(&["1.3.6.1.2.1.1.1.0".to_string()]).await.unwrap();
        assert_eq!(vbs.len(), 1);
        assert!(vbs[0].value.is_exception());
    }
}
