//! CPU and RAM utilisation polling.
//!
//! Each fetch issues a single batched GET over the vendor's ordered OID
//! candidates and takes the first usable answer. "No data" is `Ok(None)`;
//! only transport failures surface as errors.

use std::collections::HashMap;
use std::sync::Arc;

use netsync_core::Vendor;

use crate::snmp::{
    walk_column, SessionGuard, SessionOptions, SnmpConnector, SnmpError, SnmpTarget, SnmpValue,
    VarBind,
};
use crate::vendor::{
    normalize_cpu, CpuOid, RamCandidates, RamReading, VendorProfile, HR_STORAGE_RAM,
    HR_STORAGE_TYPE,
};

/// Static hrStorage indices tried when RAM rows cannot be discovered.
const STATIC_STORAGE_INDICES: std::ops::RangeInclusive<u32> = 1..=5;

/// Values below this are taken to be megabytes rather than bytes (MikroTik).
const MEGABYTE_THRESHOLD: i64 = 1024;

pub struct UsagePoller {
    connector: Arc<dyn SnmpConnector>,
    options: SessionOptions,
    storage_options: SessionOptions,
}

impl UsagePoller {
    pub fn new(
        connector: Arc<dyn SnmpConnector>,
        options: SessionOptions,
        storage_options: SessionOptions,
    ) -> Self {
        Self {
            connector,
            options,
            storage_options,
        }
    }

    /// CPU load in percent, or `None` when no candidate answered.
    pub async fn fetch_cpu_usage(
        &self,
        target: &SnmpTarget,
        vendor: Vendor,
    ) -> Result<Option<f64>, SnmpError> {
        let candidates = vendor.cpu_oids();
        let oids: Vec<String> = candidates.iter().map(|c| c.oid.to_string()).collect();

        let guard = SessionGuard::new(self.connector.open(target, &self.options).await?, target);
        let varbinds = guard.session().get(&oids).await;
        guard.close();

        let cpu = select_cpu_usage(vendor, candidates, &varbinds?);
        tracing::debug!(ip = %target.ip, vendor = %vendor, cpu = ?cpu, "CPU poll complete");
        Ok(cpu)
    }

    /// RAM utilisation in percent, or `None` when no (total, used) pair resolved.
    pub async fn fetch_ram_usage(
        &self,
        target: &SnmpTarget,
        vendor: Vendor,
    ) -> Result<Option<f64>, SnmpError> {
        let mut candidates = vendor.ram_oids();
        if vendor.discovers_storage() {
            let indices = self.discover_ram_storage(target).await;
            if indices.is_empty() {
                for index in STATIC_STORAGE_INDICES {
                    candidates.push_storage_index(&index.to_string());
                }
            } else {
                for index in &indices {
                    candidates.push_storage_index(index);
                }
            }
        }

        let guard = SessionGuard::new(self.connector.open(target, &self.options).await?, target);
        let varbinds = guard.session().get(&candidates.request_oids()).await;
        guard.close();

        let values = integer_values(&varbinds?);
        let ram = compute_ram_usage(vendor, &candidates, &values);
        tracing::debug!(ip = %target.ip, vendor = %vendor, ram = ?ram, "RAM poll complete");
        Ok(ram)
    }

    /// hrStorage indices typed as RAM. Any failure yields an empty list.
    async fn discover_ram_storage(&self, target: &SnmpTarget) -> Vec<String> {
        let walk = async {
            let guard = SessionGuard::new(
                self.connector.open(target, &self.storage_options).await?,
                target,
            );
            let column = walk_column(guard.session(), HR_STORAGE_TYPE).await;
            guard.close();
            column
        };

        match tokio::time::timeout(self.storage_options.timeout, walk).await {
            // Only hrStorageRam rows hold physical memory. Disk, flash and virtual
            // memory rows share the table and would skew the percentage.
            Ok(Ok(column)) => column
                .into_iter()
                .filter(|(_, value)| {
                    matches!(value, SnmpValue::ObjectIdentifier(oid)
                        if oid.trim_start_matches('.') == HR_STORAGE_RAM)
                })
                .map(|(index, _)| index)
                .collect(),
            Ok(Err(e)) => {
                tracing::debug!(ip = %target.ip, error = %e, "hrStorage walk failed, using static indices");
                Vec::new()
            }
            Err(_) => {
                tracing::debug!(ip = %target.ip, "hrStorage walk timed out, using static indices");
                Vec::new()
            }
        }
    }
}

/// First candidate, in list order, that returned a numeric value.
pub fn select_cpu_usage(vendor: Vendor, candidates: &[CpuOid], varbinds: &[VarBind]) -> Option<f64> {
    candidates.iter().find_map(|candidate| {
        let raw = varbinds
            .iter()
            .find(|vb| vb.oid == candidate.oid)
            .filter(|vb| !vb.value.is_exception())
            .and_then(|vb| vb.value.as_i64())?;
        Some(normalize_cpu(vendor, candidate.scale, raw as f64))
    })
}

fn integer_values(varbinds: &[VarBind]) -> HashMap<String, i64> {
    varbinds
        .iter()
        .filter(|vb| !vb.value.is_exception())
        .filter_map(|vb| Some((vb.oid.clone(), vb.value.as_i64()?)))
        .collect()
}

/// Percentage for the first (total, used) pair where both resolved and total > 0.
pub fn compute_ram_usage(
    vendor: Vendor,
    candidates: &RamCandidates,
    values: &HashMap<String, i64>,
) -> Option<f64> {
    for total_oid in &candidates.totals {
        let Some(&total) = values.get(total_oid) else {
            continue;
        };
        for (used_oid, reading) in &candidates.used {
            let Some(&raw) = values.get(used_oid) else {
                continue;
            };
            if let Some(percent) = ram_percent(vendor, total, raw, *reading) {
                return Some(percent);
            }
        }
    }
    None
}

fn ram_percent(vendor: Vendor, total: i64, raw: i64, reading: RamReading) -> Option<f64> {
    if total <= 0 {
        return None;
    }
    let used = match reading {
        RamReading::Used => raw,
        RamReading::Available => total - raw,
    };

    let (mut total, mut used) = (total as f64, used as f64);
    if vendor == Vendor::Mikrotik && total < MEGABYTE_THRESHOLD as f64 {
        total *= 1024.0 * 1024.0;
        used *= 1024.0 * 1024.0;
    }

    let percent = (used / total * 100.0 * 100.0).round() / 100.0;
    Some(percent.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::MemoryAgent;
    use crate::vendor::HR_STORAGE_SIZE;
    use std::time::Duration;

    fn poller(agent: &MemoryAgent) -> UsagePoller {
        let options = SessionOptions::default();
        let storage = SessionOptions {
            timeout: Duration::from_millis(200),
            ..SessionOptions::default()
        };
        UsagePoller::new(Arc::new(agent.clone()), options, storage)
    }

    fn target() -> SnmpTarget {
        SnmpTarget::new("10.0.0.1", "public")
    }

    #[test]
    fn test_ram_pair_percentage() {
        let mut candidates = RamCandidates::default();
        candidates.push_storage_index("1");
        let values = HashMap::from([
            (format!("{HR_STORAGE_SIZE}.1"), 2_033_782_784),
            ("1.3.6.1.2.1.25.2.3.1.6.1".to_string(), 973_664_256),
        ]);
        assert_eq!(compute_ram_usage(Vendor::Generic, &candidates, &values), Some(47.87));
    }

    #[test]
    fn test_ram_tries_every_pair() {
        let candidates = RamCandidates {
            totals: vec!["t1".into(), "t2".into()],
            used: vec![("u1".into(), RamReading::Used), ("u2".into(), RamReading::Used)],
        };
        // t1 is zero, so the search moves on to t2 and its first resolvable used.
        let values = HashMap::from([
            ("t1".to_string(), 0),
            ("t2".to_string(), 400),
            ("u2".to_string(), 100),
        ]);
        assert_eq!(compute_ram_usage(Vendor::Generic, &candidates, &values), Some(25.0));
        assert_eq!(compute_ram_usage(Vendor::Generic, &candidates, &HashMap::new()), None);
    }

    #[test]
    fn test_ram_available_reading() {
        let candidates = RamCandidates {
            totals: vec!["t".into()],
            used: vec![("free".into(), RamReading::Available)],
        };
        let values = HashMap::from([("t".to_string(), 512), ("free".to_string(), 384)]);
        assert_eq!(compute_ram_usage(Vendor::Mikrotik, &candidates, &values), Some(25.0));
    }

    #[test]
    fn test_ram_clamped() {
        let candidates = RamCandidates {
            totals: vec!["t".into()],
            used: vec![("u".into(), RamReading::Used)],
        };
        let values = HashMap::from([("t".to_string(), 100), ("u".to_string(), 150)]);
        assert_eq!(compute_ram_usage(Vendor::Generic, &candidates, &values), Some(100.0));
    }

    #[tokio::test]
    async fn test_cpu_first_candidate_wins() {
        let oids = Vendor::Generic.cpu_oids();
        let agent = MemoryAgent::new()
            .with(oids[1].oid, SnmpValue::Integer(31))
            .with(oids[2].oid, SnmpValue::Integer(77));
        let cpu = poller(&agent)
            .fetch_cpu_usage(&target(), Vendor::Generic)
            .await
            .unwrap();
        assert_eq!(cpu, Some(31.0));
        assert_eq!(agent.requests(), 1);
        assert_eq!(agent.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_cpu_all_exceptions_is_none() {
        let agent = MemoryAgent::new();
        let cpu = poller(&agent)
            .fetch_cpu_usage(&target(), Vendor::Cisco)
            .await
            .unwrap();
        assert_eq!(cpu, None);
    }

    #[tokio::test]
    async fn test_cpu_transport_error_propagates() {
        let agent = MemoryAgent::new().failing_gets();
        let result = poller(&agent)
            .fetch_cpu_usage(&target(), Vendor::Generic)
            .await;
        assert!(matches!(result, Err(SnmpError::Transport(_))));
        assert_eq!(agent.sessions_closed(), agent.sessions_opened());
    }

    #[tokio::test]
    async fn test_ram_uses_discovered_storage_rows() {
        let agent = MemoryAgent::new()
            .with(
                &format!("{HR_STORAGE_TYPE}.3"),
                SnmpValue::ObjectIdentifier("1.3.6.1.2.1.25.2.1.4".to_string()),
            )
            .with(
                &format!("{HR_STORAGE_TYPE}.7"),
                SnmpValue::ObjectIdentifier(HR_STORAGE_RAM.to_string()),
            )
            .with("1.3.6.1.2.1.25.2.3.1.5.3", SnmpValue::Integer(1000))
            .with("1.3.6.1.2.1.25.2.3.1.6.3", SnmpValue::Integer(900))
            .with("1.3.6.1.2.1.25.2.3.1.5.7", SnmpValue::Integer(2_033_782_784))
            .with("1.3.6.1.2.1.25.2.3.1.6.7", SnmpValue::Integer(973_664_256));
        let ram = poller(&agent)
            .fetch_ram_usage(&target(), Vendor::Generic)
            .await
            .unwrap();
        assert_eq!(ram, Some(47.87));
        assert_eq!(agent.sessions_closed(), 2);
    }

    #[tokio::test]
    async fn test_storage_discovery_keeps_only_ram_rows() {
        let agent = MemoryAgent::new()
            .with(
                &format!("{HR_STORAGE_TYPE}.1"),
                SnmpValue::ObjectIdentifier("1.3.6.1.2.1.25.2.1.3".to_string()),
            )
            .with(
                &format!("{HR_STORAGE_TYPE}.4"),
                SnmpValue::ObjectIdentifier("1.3.6.1.2.1.25.2.1.4".to_string()),
            )
            .with(
                &format!("{HR_STORAGE_TYPE}.6"),
                SnmpValue::ObjectIdentifier(format!(".{HR_STORAGE_RAM}")),
            )
            .with(&format!("{HR_STORAGE_TYPE}.9"), SnmpValue::Integer(2));
        let rows = poller(&agent).discover_ram_storage(&target()).await;
        assert_eq!(rows, vec!["6".to_string()]);
    }

    #[tokio::test]
    async fn test_ram_storage_walk_failure_falls_back_to_static() {
        let agent = MemoryAgent::new()
            .failing_walk(HR_STORAGE_TYPE)
            .with("1.3.6.1.2.1.25.2.3.1.5.2", SnmpValue::Integer(800))
            .with("1.3.6.1.2.1.25.2.3.1.6.2", SnmpValue::Integer(200));
        let ram = poller(&agent)
            .fetch_ram_usage(&target(), Vendor::Generic)
            .await
            .unwrap();
        assert_eq!(ram, Some(25.0));
    }
}
