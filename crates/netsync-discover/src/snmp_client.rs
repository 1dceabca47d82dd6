//! Production SNMP transport over `async-snmp`.

use std::sync::{Arc, Mutex};

use async_snmp::{Auth, Client, Oid, OidOrdering, UdpClient, Value, WalkMode};
use async_trait::async_trait;

use crate::snmp::{
    SessionOptions, SnmpConnector, SnmpError, SnmpSession, SnmpTarget, SnmpValue, SnmpVersion,
    VarBind,
};

/// Opens one UDP client per session.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsyncSnmpConnector;

#[async_trait]
impl SnmpConnector for AsyncSnmpConnector {
    async fn open(
        &self,
        target: &SnmpTarget,
        options: &SessionOptions,
    ) -> Result<Box<dyn SnmpSession>, SnmpError> {
        let auth = match options.version {
            SnmpVersion::V1 => Auth::v1(target.community.as_str()),
            SnmpVersion::V2c => Auth::v2c(target.community.as_str()),
        };
        let addr = format!("{}:{}", target.ip, target.port);
        let client = Client::builder(addr.as_str(), auth)
            .timeout(options.timeout)
            .retries(options.retries)
            .walk_mode(WalkMode::Auto)
            .oid_ordering(OidOrdering::Strict)
            .connect()
            .await
            .map_err(|e| map_error(&target.ip, e))?;

        Ok(Box::new(AsyncSnmpSession {
            ip: target.ip.clone(),
            client: Mutex::new(Some(Arc::new(client))),
        }))
    }
}

struct AsyncSnmpSession {
    ip: String,
    client: Mutex<Option<Arc<UdpClient>>>,
}

impl AsyncSnmpSession {
    fn client(&self) -> Result<Arc<UdpClient>, SnmpError> {
        self.client
            .lock()
            .map_err(|e| SnmpError::Transport(e.to_string()))?
            .clone()
            .ok_or(SnmpError::Closed)
    }
}

#[async_trait]
impl SnmpSession for AsyncSnmpSession {
    async fn get(&self, oids: &[String]) -> Result<Vec<VarBind>, SnmpError> {
        let client = self.client()?;
        let parsed = oids.iter().map(|o| parse(o)).collect::<Result<Vec<_>, _>>()?;
        let varbinds = client
            .get_many(&parsed)
            .await
            .map_err(|e| map_error(&self.ip, e))?;
        Ok(varbinds
            .into_iter()
            .map(|vb| VarBind::new(vb.oid.to_string(), convert(vb.value)))
            .collect())
    }

    /// GETBULK on v2c, GETNEXT on v1. The client stops at the end of the
    /// subtree and fails the walk if the agent returns a non-increasing OID.
    async fn walk(&self, oid: &str) -> Result<Vec<VarBind>, SnmpError> {
        let client = self.client()?;
        let varbinds = client
            .walk(parse(oid)?)
            .map_err(|e| map_error(&self.ip, e))?
            .collect()
            .await
            .map_err(|e| map_error(&self.ip, e))?;

        Ok(varbinds
            .into_iter()
            .map(|vb| VarBind::new(vb.oid.to_string(), convert(vb.value)))
            .collect())
    }

    fn close(&self) {
        if let Ok(mut client) = self.client.lock() {
            client.take();
        }
    }
}

fn parse(oid: &str) -> Result<Oid, SnmpError> {
    Oid::parse(oid.trim_start_matches('.')).map_err(|_| SnmpError::InvalidOid(oid.to_string()))
}

fn map_error(ip: &str, err: async_snmp::Error) -> SnmpError {
    match err {
        async_snmp::Error::Timeout { .. } => SnmpError::Timeout {
            target: ip.to_string(),
        },
        other => SnmpError::Transport(other.to_string()),
    }
}

fn convert(value: Value) -> SnmpValue {
    match value {
        Value::Integer(v) => SnmpValue::Integer(i64::from(v)),
        Value::Counter32(v) => SnmpValue::Counter32(v),
        Value::Gauge32(v) => SnmpValue::Gauge32(v),
        Value::TimeTicks(v) => SnmpValue::TimeTicks(v),
        Value::Counter64(v) => SnmpValue::Counter64(v),
        Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
        Value::ObjectIdentifier(oid) => SnmpValue::ObjectIdentifier(oid.to_string()),
        Value::IpAddress(addr) => SnmpValue::IpAddress(addr),
        Value::NoSuchObject => SnmpValue::NoSuchObject,
        Value::NoSuchInstance => SnmpValue::NoSuchInstance,
        Value::EndOfMibView => SnmpValue::EndOfMibView,
        _ => SnmpValue::Null,
    }
}
