//! Inventory source: the authoritative device, port and sensor lists.
//!
//! The HTTP client speaks a LibreNMS-style JSON API
//! (`{devices:[...]}`, `{ports:[...]}`, `{sensors:[...]}`) with a token header.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};

use netsync_core::OperStatus;

use crate::config::InventoryConfig;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Inventory returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to decode inventory response: {0}")]
    Decode(String),
}

/// A device as listed by the inventory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InventoryDevice {
    #[serde(default, alias = "device_id")]
    pub id: Option<u64>,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub community: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default, alias = "sysDescr")]
    pub sys_descr: Option<String>,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: OperStatus,
}

impl InventoryDevice {
    /// Management address: `ip` when set, otherwise the hostname.
    pub fn management_ip(&self) -> Option<&str> {
        Some(self.ip.trim())
            .filter(|ip| !ip.is_empty())
            .or_else(|| self.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty()))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InventoryPort {
    #[serde(rename = "ifIndex")]
    pub if_index: u32,
    #[serde(default, rename = "ifName")]
    pub if_name: Option<String>,
    #[serde(default, rename = "ifDescr")]
    pub if_descr: Option<String>,
    #[serde(default, rename = "ifAlias")]
    pub if_alias: Option<String>,
    #[serde(default, rename = "ifOperStatus", deserialize_with = "lenient_status")]
    pub oper_status: OperStatus,
}

impl InventoryPort {
    /// ifName, falling back to ifDescr, then `if{index}`.
    pub fn name(&self) -> String {
        [&self.if_name, &self.if_descr]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("if{}", self.if_index))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InventorySensor {
    #[serde(default)]
    pub device_id: Option<u64>,
    #[serde(default)]
    pub sensor_class: String,
    #[serde(default)]
    pub sensor_descr: String,
    #[serde(default)]
    pub sensor_current: Option<f64>,
}

impl InventorySensor {
    pub fn is_optical(&self) -> bool {
        self.sensor_class.eq_ignore_ascii_case("dbm")
    }
}

#[derive(Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<InventoryDevice>,
}

#[derive(Deserialize)]
struct PortsResponse {
    #[serde(default)]
    ports: Vec<InventoryPort>,
}

#[derive(Deserialize)]
struct SensorsResponse {
    #[serde(default)]
    sensors: Vec<InventorySensor>,
}

/// Accepts `true`/`false`, `1`/`0` or status strings.
fn lenient_status<'de, D>(deserializer: D) -> Result<OperStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(true) => OperStatus::Up,
        serde_json::Value::Number(n) if n.as_i64() == Some(1) => OperStatus::Up,
        serde_json::Value::String(s) => s.parse().unwrap_or_default(),
        _ => OperStatus::Down,
    })
}

#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn fetch_devices(&self) -> Result<Vec<InventoryDevice>, InventoryError>;

    async fn fetch_ports(&self, device: &InventoryDevice)
        -> Result<Vec<InventoryPort>, InventoryError>;

    /// Every sensor known to the inventory, across all devices.
    async fn fetch_sensors(&self) -> Result<Vec<InventorySensor>, InventoryError>;
}

/// reqwest-backed inventory client.
pub struct HttpInventory {
    http: Client,
    base_url: String,
    auth_header: String,
    token: String,
}

impl HttpInventory {
    pub fn new(config: &InventoryConfig) -> Result<Self, InventoryError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            auth_header: config.auth_header.clone(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, InventoryError> {
        let url = self.url(path);
        let mut req = self.http.get(&url);
        if !self.token.is_empty() {
            req = if self.auth_header.eq_ignore_ascii_case("authorization") {
                req.bearer_auth(&self.token)
            } else {
                req.header(self.auth_header.as_str(), self.token.as_str())
            };
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(InventoryError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| InventoryError::Decode(e.to_string()))
    }
}

#[async_trait]
impl InventorySource for HttpInventory {
    async fn fetch_devices(&self) -> Result<Vec<InventoryDevice>, InventoryError> {
        let body: DevicesResponse = self.get_json("/api/v0/devices").await?;
        Ok(body.devices)
    }

    async fn fetch_ports(
        &self,
        device: &InventoryDevice,
    ) -> Result<Vec<InventoryPort>, InventoryError> {
        let key = device
            .id
            .map(|id| id.to_string())
            .or_else(|| device.management_ip().map(str::to_string))
            .unwrap_or_default();
        let path = format!(
            "/api/v0/devices/{key}/ports?columns=ifIndex,ifName,ifDescr,ifAlias,ifOperStatus"
        );
        let body: PortsResponse = self.get_json(&path).await?;
        Ok(body.ports)
    }

    async fn fetch_sensors(&self) -> Result<Vec<InventorySensor>, InventoryError> {
        let body: SensorsResponse = self.get_json("/api/v0/resources/sensors").await?;
        Ok(body.sensors)
    }
}

// ── Optical join ─────────────────────────────────────────────────

/// Tx/Rx optical levels for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpticalReading {
    pub tx_dbm: Option<f64>,
    pub rx_dbm: Option<f64>,
}

/// Attach dBm sensors to interfaces whose name prefixes the sensor description.
///
/// The longest interface name ending at a word boundary wins, so `sfp10`
/// readings never land on `sfp1`. Direction comes from a `tx`/`rx` token in
/// the description.
pub fn join_optics<'a>(
    interface_names: impl IntoIterator<Item = &'a str>,
    sensors: &[InventorySensor],
) -> HashMap<String, OpticalReading> {
    let names: Vec<&str> = interface_names.into_iter().collect();
    let mut readings: HashMap<String, OpticalReading> = HashMap::new();

    for sensor in sensors.iter().filter(|s| s.is_optical()) {
        let Some(value) = sensor.sensor_current else {
            continue;
        };
        let Some(name) = match_interface(&sensor.sensor_descr, &names) else {
            continue;
        };
        let reading = readings.entry(name.to_string()).or_default();
        match direction(&sensor.sensor_descr[name.len()..]) {
            Some(Direction::Tx) => reading.tx_dbm = Some(value),
            Some(Direction::Rx) => reading.rx_dbm = Some(value),
            None => {}
        }
    }
    readings
}

fn match_interface<'n>(descr: &str, names: &[&'n str]) -> Option<&'n str> {
    names
        .iter()
        .copied()
        .filter(|name| !name.is_empty() && descr.starts_with(name))
        .filter(|name| {
            descr[name.len()..]
                .chars()
                .next()
                .map_or(true, |c| !c.is_alphanumeric())
        })
        .max_by_key(|name| name.len())
}

enum Direction {
    Tx,
    Rx,
}

fn direction(rest: &str) -> Option<Direction> {
    rest.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .find_map(|token| {
            if token.starts_with("tx") || token.starts_with("transmit") {
                Some(Direction::Tx)
            } else if token.starts_with("rx") || token.starts_with("receive") {
                Some(Direction::Rx)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(descr: &str, value: f64) -> InventorySensor {
        InventorySensor {
            device_id: Some(1),
            sensor_class: "dbm".to_string(),
            sensor_descr: descr.to_string(),
            sensor_current: Some(value),
        }
    }

    #[test]
    fn test_device_decoding_is_lenient() {
        let body: DevicesResponse = serde_json::from_str(
            r#"{"status":"ok","devices":[
                {"device_id":7,"hostname":"core-sw","ip":"10.0.0.1","community":"public","os":"routeros","status":1},
                {"device_id":8,"hostname":"10.0.0.2","ip":"","status":false},
                {"device_id":9,"hostname":"edge","ip":"10.0.0.3","status":"up","sysDescr":"Huawei VRP"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.devices.len(), 3);
        assert_eq!(body.devices[0].id, Some(7));
        assert_eq!(body.devices[0].status, OperStatus::Up);
        assert_eq!(body.devices[1].status, OperStatus::Down);
        assert_eq!(body.devices[1].management_ip(), Some("10.0.0.2"));
        assert_eq!(body.devices[2].status, OperStatus::Up);
        assert_eq!(body.devices[2].sys_descr.as_deref(), Some("Huawei VRP"));
    }

    #[test]
    fn test_port_name_fallbacks() {
        let body: PortsResponse = serde_json::from_str(
            r#"{"ports":[
                {"ifIndex":1,"ifName":"ether1","ifOperStatus":"up"},
                {"ifIndex":2,"ifName":"","ifDescr":"ether2","ifOperStatus":"lowerLayerDown"},
                {"ifIndex":3}
            ]}"#,
        )
        .unwrap();
        assert_eq!(body.ports[0].name(), "ether1");
        assert_eq!(body.ports[0].oper_status, OperStatus::Up);
        assert_eq!(body.ports[1].name(), "ether2");
        assert_eq!(body.ports[1].oper_status, OperStatus::Down);
        assert_eq!(body.ports[2].name(), "if3");
    }

    #[test]
    fn test_optics_join_longest_prefix() {
        let sensors = vec![
            sensor("sfp1 Tx Power", -2.1),
            sensor("sfp1 Rx Power", -7.4),
            sensor("sfp10 Rx Power", -12.0),
            sensor("ether1 Rx", -1.0),
        ];
        let mut temperature = sensor("sfp1 Rx", 41.0);
        temperature.sensor_class = "temperature".to_string();

        let mut all = sensors.clone();
        all.push(temperature);
        let optics = join_optics(["sfp1", "sfp10"], &all);

        assert_eq!(optics["sfp1"].tx_dbm, Some(-2.1));
        assert_eq!(optics["sfp1"].rx_dbm, Some(-7.4));
        assert_eq!(optics["sfp10"].rx_dbm, Some(-12.0));
        assert_eq!(optics["sfp10"].tx_dbm, None);
        assert!(!optics.contains_key("ether1"));
    }

    #[test]
    fn test_base_url_is_normalized() {
        let inventory = HttpInventory::new(&InventoryConfig {
            base_url: "http://nms.local/".to_string(),
            ..InventoryConfig::default()
        })
        .unwrap();
        assert_eq!(inventory.url("/api/v0/devices"), "http://nms.local/api/v0/devices");
    }
}
