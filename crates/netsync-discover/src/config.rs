//! Configuration for the netsync-discover daemon.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{DiscoverError, Result};
use crate::snmp::{SessionOptions, SnmpVersion};

/// Environment variable prefix; nested keys use `__`, e.g. `NETSYNC__DISCOVER__VLAN_TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "NETSYNC";

/// Layer `<file_prefix>.{toml,yaml,json}` (optional) under `NETSYNC__*` variables.
pub fn load_settings(file_prefix: &str) -> Result<config::Config> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| DiscoverError::Config(e.to_string()))
}

/// Top-level discover configuration.
///
/// Loaded from the `[discover]` section of `netsync.toml` or
/// `NETSYNC__DISCOVER__` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverConfig {
    /// Inventory HTTP source.
    #[serde(default)]
    pub inventory: InventoryConfig,

    /// Per-request SNMP timeout in milliseconds.
    #[serde(default = "default_snmp_timeout_ms")]
    pub snmp_timeout_ms: u64,

    /// Timeout for the hrStorageType discovery walk.
    #[serde(default = "default_storage_walk_timeout_ms")]
    pub storage_walk_timeout_ms: u64,

    /// Deadline for one device's CPU + RAM poll.
    #[serde(default = "default_usage_timeout_ms")]
    pub usage_timeout_ms: u64,

    /// Deadline for one device's VLAN discovery.
    #[serde(default = "default_vlan_timeout_ms")]
    pub vlan_timeout_ms: u64,

    /// Transport-level retransmissions. The engine itself never retries.
    #[serde(default)]
    pub snmp_retries: u32,

    #[serde(default)]
    pub snmp_version: SnmpVersion,

    /// Number of dot1qPvid slots polled on MikroTik bridges.
    #[serde(default = "default_pvid_port_slots")]
    pub pvid_port_slots: u32,

    /// Maximum devices polled at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_devices: usize,

    /// Daemon cycle interval in seconds.
    #[serde(default = "default_interval")]
    pub sync_interval_secs: u64,

    /// Delete memberships that disappeared from a device's VLAN table.
    #[serde(default)]
    pub prune_vlan_memberships: bool,

    /// Only devices inside these CIDRs are reconciled. Empty means all.
    #[serde(default)]
    pub managed_subnets: Vec<String>,
}

/// Where and how to reach the inventory API.
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_inventory_url")]
    pub base_url: String,

    #[serde(default)]
    pub token: String,

    /// Header carrying the token. `Authorization` sends `Bearer <token>`.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    #[serde(default = "default_inventory_timeout")]
    pub timeout_secs: u64,
}

fn default_snmp_timeout_ms() -> u64 {
    5000
}

fn default_storage_walk_timeout_ms() -> u64 {
    2000
}

fn default_usage_timeout_ms() -> u64 {
    15_000
}

fn default_vlan_timeout_ms() -> u64 {
    18_000
}

fn default_pvid_port_slots() -> u32 {
    24
}

fn default_max_concurrent() -> usize {
    4
}

fn default_interval() -> u64 {
    300
}

fn default_inventory_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_auth_header() -> String {
    "X-Auth-Token".to_string()
}

fn default_inventory_timeout() -> u64 {
    30
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_inventory_url(),
            token: String::new(),
            auth_header: default_auth_header(),
            timeout_secs: default_inventory_timeout(),
        }
    }
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        Self {
            inventory: InventoryConfig::default(),
            snmp_timeout_ms: default_snmp_timeout_ms(),
            storage_walk_timeout_ms: default_storage_walk_timeout_ms(),
            usage_timeout_ms: default_usage_timeout_ms(),
            vlan_timeout_ms: default_vlan_timeout_ms(),
            snmp_retries: 0,
            snmp_version: SnmpVersion::default(),
            pvid_port_slots: default_pvid_port_slots(),
            max_concurrent_devices: default_max_concurrent(),
            sync_interval_secs: default_interval(),
            prune_vlan_memberships: false,
            managed_subnets: Vec::new(),
        }
    }
}

impl DiscoverConfig {
    /// Transport options for ordinary GET/WALK sessions.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: Duration::from_millis(self.snmp_timeout_ms),
            retries: self.snmp_retries,
            version: self.snmp_version,
        }
    }

    /// Transport options for the short storage-index discovery walk.
    pub fn storage_walk_options(&self) -> SessionOptions {
        SessionOptions {
            timeout: Duration::from_millis(self.storage_walk_timeout_ms),
            retries: 0,
            version: self.snmp_version,
        }
    }

    pub fn usage_deadline(&self) -> Duration {
        Duration::from_millis(self.usage_timeout_ms)
    }

    pub fn vlan_deadline(&self) -> Duration {
        Duration::from_millis(self.vlan_timeout_ms)
    }

    /// The `discover` section, or defaults when it is absent or malformed.
    pub fn from_settings(settings: &config::Config) -> Self {
        match settings.get::<DiscoverConfig>("discover") {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "No usable [discover] section, using defaults");
                Self::default()
            }
        }
    }
}
