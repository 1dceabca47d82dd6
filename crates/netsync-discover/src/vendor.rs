//! Vendor classification and per-vendor OID profiles.

use netsync_core::Vendor;

/// Ordered signature table. The first vendor with a matching substring wins.
pub const VENDOR_SIGNATURES: &[(Vendor, &[&str])] = &[
    (Vendor::Mikrotik, &["mikrotik", "routeros"]),
    (Vendor::Juniper, &["junos", "juniper", "srx", "ex", "mx"]),
    (Vendor::Huawei, &["huawei", "vrp", "cloudengine", "ce"]),
    (Vendor::Cisco, &["cisco", "ios", "nexus", "catalyst"]),
    (Vendor::Hp, &["hp", "hpe", "procurve", "aruba"]),
];

/// Classify a free-text OS or sysDescr string.
pub fn classify(text: Option<&str>) -> Vendor {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Vendor::Generic;
    };
    let lowered = text.to_lowercase();
    VENDOR_SIGNATURES
        .iter()
        .find(|(_, signatures)| signatures.iter().any(|s| lowered.contains(s)))
        .map(|(vendor, _)| *vendor)
        .unwrap_or(Vendor::Generic)
}

/// Classify by the inventory OS field, falling back to sysDescr.
pub fn classify_device(os: Option<&str>, sys_descr: Option<&str>) -> Vendor {
    match classify(os) {
        Vendor::Generic => classify(sys_descr),
        vendor => vendor,
    }
}

// ── OID profiles ─────────────────────────────────────────────────

pub const HR_PROCESSOR_LOAD: &str = "1.3.6.1.2.1.25.3.3.1.2";
pub const HR_STORAGE_TYPE: &str = "1.3.6.1.2.1.25.2.3.1.2";
pub const HR_STORAGE_SIZE: &str = "1.3.6.1.2.1.25.2.3.1.5";
pub const HR_STORAGE_USED: &str = "1.3.6.1.2.1.25.2.3.1.6";
pub const HR_STORAGE_RAM: &str = "1.3.6.1.2.1.25.2.1.2";

/// How a raw CPU reading maps to a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuScale {
    Percent,
    /// 0-255 load scale.
    ByteScale,
    /// hrProcessorLoad; some agents report centipercent.
    HrProcessorLoad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuOid {
    pub oid: &'static str,
    pub scale: CpuScale,
}

const fn cpu(oid: &'static str, scale: CpuScale) -> CpuOid {
    CpuOid { oid, scale }
}

const GENERIC_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.2.1.25.3.3.1.2.1", CpuScale::HrProcessorLoad),
    cpu("1.3.6.1.2.1.25.3.3.1.2.196608", CpuScale::HrProcessorLoad),
    cpu("1.3.6.1.4.1.2021.11.9.0", CpuScale::Percent),
    cpu("1.3.6.1.4.1.2021.11.10.0", CpuScale::Percent),
];

const MIKROTIK_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.2.1.25.3.3.1.2.1", CpuScale::HrProcessorLoad),
    cpu("1.3.6.1.4.1.14988.1.1.3.14.0", CpuScale::ByteScale),
    cpu("1.3.6.1.2.1.25.3.3.1.2.196608", CpuScale::HrProcessorLoad),
];

const HUAWEI_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.4.1.2011.5.25.31.1.1.1.1.5.16842753", CpuScale::Percent),
    cpu("1.3.6.1.4.1.2011.5.25.31.1.1.1.1.5.67108867", CpuScale::Percent),
    cpu("1.3.6.1.4.1.2011.6.3.4.1.2.0.0.0", CpuScale::Percent),
];

const CISCO_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.4.1.9.9.109.1.1.1.1.8.1", CpuScale::Percent),
    cpu("1.3.6.1.4.1.9.9.109.1.1.1.1.5.1", CpuScale::Percent),
    cpu("1.3.6.1.4.1.9.2.1.58.0", CpuScale::Percent),
];

const JUNIPER_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.4.1.2636.3.1.13.1.8.9.1.0.0", CpuScale::Percent),
    cpu("1.3.6.1.4.1.2636.3.1.13.1.8.9.0.0.0", CpuScale::Percent),
];

const HP_CPU: &[CpuOid] = &[
    cpu("1.3.6.1.4.1.11.2.14.11.5.1.9.6.1.0", CpuScale::Percent),
    cpu("1.3.6.1.2.1.25.3.3.1.2.1", CpuScale::HrProcessorLoad),
];

/// Interpretation of a "used" memory OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RamReading {
    Used,
    /// Free memory; used = total - available.
    Available,
}

/// Ordered RAM candidates: every total is tried against every used reading.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RamCandidates {
    pub totals: Vec<String>,
    pub used: Vec<(String, RamReading)>,
}

impl RamCandidates {
    /// Append an hrStorage index as a (size, used) candidate.
    pub fn push_storage_index(&mut self, index: &str) {
        self.totals.push(format!("{HR_STORAGE_SIZE}.{index}"));
        self.used
            .push((format!("{HR_STORAGE_USED}.{index}"), RamReading::Used));
    }

    /// All OIDs in declared order, without duplicates.
    pub fn request_oids(&self) -> Vec<String> {
        let mut oids: Vec<String> = Vec::with_capacity(self.totals.len() + self.used.len());
        for oid in self.totals.iter().chain(self.used.iter().map(|(o, _)| o)) {
            if !oids.contains(oid) {
                oids.push(oid.clone());
            }
        }
        oids
    }
}

/// Which VLAN tables a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanStrategy {
    /// PVID column + MAC-keyed FDB, static bridge-VLAN table fallback.
    MikrotikBridge,
    /// hwL2Vlan table, Q-BRIDGE fallback.
    HuaweiL2Vlan,
    /// dot1qVlanStaticTable / dot1qVlanCurrentTable.
    QBridge,
}

/// Static per-vendor polling profile.
pub trait VendorProfile {
    fn cpu_oids(&self) -> &'static [CpuOid];
    fn ram_oids(&self) -> RamCandidates;
    fn vlan_strategy(&self) -> VlanStrategy;
    /// Whether hrStorage indices are discovered by walking hrStorageType.
    fn discovers_storage(&self) -> bool;
}

impl VendorProfile for Vendor {
    fn cpu_oids(&self) -> &'static [CpuOid] {
        match self {
            Vendor::Mikrotik => MIKROTIK_CPU,
            Vendor::Huawei => HUAWEI_CPU,
            Vendor::Cisco => CISCO_CPU,
            Vendor::Juniper => JUNIPER_CPU,
            Vendor::Hp => HP_CPU,
            Vendor::Generic => GENERIC_CPU,
        }
    }

    fn ram_oids(&self) -> RamCandidates {
        let mut candidates = RamCandidates::default();
        match self {
            Vendor::Mikrotik => {
                candidates.push_storage_index("65536");
                candidates.push_storage_index("131072");
            }
            Vendor::Huawei => {
                candidates
                    .totals
                    .push("1.3.6.1.4.1.2011.6.3.5.1.1.2.0.0.0".to_string());
                candidates.used.push((
                    "1.3.6.1.4.1.2011.6.3.5.1.1.4.0.0.0".to_string(),
                    RamReading::Available,
                ));
            }
            Vendor::Cisco | Vendor::Juniper | Vendor::Hp => {
                candidates
                    .totals
                    .push("1.3.6.1.4.1.2021.4.5.0".to_string());
                candidates
                    .used
                    .push(("1.3.6.1.4.1.2021.4.6.0".to_string(), RamReading::Available));
                candidates.push_storage_index("1");
            }
            Vendor::Generic => {
                candidates
                    .totals
                    .push("1.3.6.1.4.1.2021.4.5.0".to_string());
                candidates
                    .used
                    .push(("1.3.6.1.4.1.2021.4.6.0".to_string(), RamReading::Available));
            }
        }
        candidates
    }

    fn vlan_strategy(&self) -> VlanStrategy {
        match self {
            Vendor::Mikrotik => VlanStrategy::MikrotikBridge,
            Vendor::Huawei => VlanStrategy::HuaweiL2Vlan,
            Vendor::Juniper | Vendor::Cisco | Vendor::Hp | Vendor::Generic => VlanStrategy::QBridge,
        }
    }

    fn discovers_storage(&self) -> bool {
        matches!(self, Vendor::Generic)
    }
}

/// Convert a raw CPU reading to a percentage in `[0, 100]`.
pub fn normalize_cpu(vendor: Vendor, scale: CpuScale, raw: f64) -> f64 {
    let value = match (vendor, scale) {
        (Vendor::Mikrotik, CpuScale::ByteScale) => (raw * 100.0 / 255.0).round(),
        (Vendor::Mikrotik, CpuScale::HrProcessorLoad) if raw > 100.0 => raw / 100.0,
        _ => raw,
    };
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_order() {
        assert_eq!(classify(Some("RouterOS CCR2004")), Vendor::Mikrotik);
        assert_eq!(classify(Some("JUNOS 21.4R3")), Vendor::Juniper);
        assert_eq!(classify(Some("Huawei Versatile Routing Platform")), Vendor::Huawei);
        assert_eq!(classify(Some("Cisco IOS Software")), Vendor::Cisco);
        assert_eq!(classify(Some("ProCurve J9280A")), Vendor::Hp);
        assert_eq!(classify(Some("Linux 5.10")), Vendor::Generic);
        assert_eq!(classify(Some("")), Vendor::Generic);
        assert_eq!(classify(None), Vendor::Generic);
    }

    #[test]
    fn test_earlier_signature_wins() {
        // "mikrotik" precedes the juniper "ex" substring.
        assert_eq!(classify(Some("MikroTik hEX")), Vendor::Mikrotik);
        assert_eq!(classify(Some("Cisco IOS on HP hardware")), Vendor::Cisco);
        // Short signatures match inside longer words.
        assert_eq!(classify(Some("Cisco Nexus 9000")), Vendor::Juniper);
    }

    #[test]
    fn test_classify_device_falls_back_to_sys_descr() {
        assert_eq!(
            classify_device(Some("linux"), Some("RouterOS RB4011")),
            Vendor::Mikrotik
        );
        assert_eq!(
            classify_device(Some("vrp"), Some("RouterOS RB4011")),
            Vendor::Huawei
        );
    }

    #[test]
    fn test_generic_profile() {
        assert_eq!(Vendor::Generic.cpu_oids().len(), 4);
        assert!(Vendor::Generic.discovers_storage());
        assert!(!Vendor::Mikrotik.discovers_storage());
        assert_eq!(Vendor::Hp.vlan_strategy(), VlanStrategy::QBridge);
    }

    #[test]
    fn test_cpu_normalization() {
        assert_eq!(normalize_cpu(Vendor::Mikrotik, CpuScale::ByteScale, 255.0), 100.0);
        assert_eq!(normalize_cpu(Vendor::Mikrotik, CpuScale::ByteScale, 51.0), 20.0);
        assert_eq!(normalize_cpu(Vendor::Mikrotik, CpuScale::HrProcessorLoad, 4250.0), 42.5);
        assert_eq!(normalize_cpu(Vendor::Mikrotik, CpuScale::HrProcessorLoad, 37.0), 37.0);
        assert_eq!(normalize_cpu(Vendor::Generic, CpuScale::HrProcessorLoad, 4250.0), 100.0);
        assert_eq!(normalize_cpu(Vendor::Huawei, CpuScale::Percent, -3.0), 0.0);
    }

    #[test]
    fn test_request_oids_are_deduplicated() {
        let mut candidates = RamCandidates::default();
        candidates.push_storage_index("1");
        candidates.push_storage_index("1");
        assert_eq!(candidates.request_oids().len(), 2);
    }
}
