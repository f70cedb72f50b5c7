//! Service data model
//!
//! Field names follow the JSON wire format exchanged between nodes and posted
//! to webhooks, so they are renamed explicitly rather than case-converted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a service on a node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ServiceStatus {
    #[default]
    Alive,
    Tombstone,
    Unknown,
}

impl From<ServiceStatus> for i32 {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Alive => 0,
            ServiceStatus::Tombstone => 1,
            ServiceStatus::Unknown => 3,
        }
    }
}

impl From<i32> for ServiceStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => ServiceStatus::Alive,
            1 => ServiceStatus::Tombstone,
            _ => ServiceStatus::Unknown,
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Alive => write!(f, "Alive"),
            ServiceStatus::Tombstone => write!(f, "Tombstone"),
            ServiceStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How the proxy fronts a service
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    #[default]
    Http,
    Tcp,
    Ws,
    None,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyMode::Http => "http",
            ProxyMode::Tcp => "tcp",
            ProxyMode::Ws => "ws",
            ProxyMode::None => "none",
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published port of a service instance
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    #[serde(rename = "Type")]
    pub port_type: String,
    #[serde(rename = "Port")]
    pub port: u16,
    /// Cluster-wide port the service is reachable on through the proxy.
    /// Zero means the port is not proxied.
    #[serde(rename = "ServicePort", default)]
    pub service_port: u16,
    #[serde(rename = "IP", default)]
    pub ip: String,
}

impl Port {
    pub fn tcp(ip: impl Into<String>, port: u16, service_port: u16) -> Self {
        Self {
            port_type: "tcp".to_string(),
            port,
            service_port,
            ip: ip.into(),
        }
    }
}

/// A service instance running on one node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Ports", default)]
    pub ports: Vec<Port>,
    #[serde(rename = "Updated")]
    pub updated: DateTime<Utc>,
    #[serde(rename = "ProxyMode", default)]
    pub proxy_mode: ProxyMode,
    #[serde(rename = "Status", default)]
    pub status: ServiceStatus,
}

impl Service {
    pub fn new(id: impl Into<String>, name: impl Into<String>, hostname: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            image: String::new(),
            created: now,
            hostname: hostname.into(),
            ports: Vec::new(),
            updated: now,
            proxy_mode: ProxyMode::default(),
            status: ServiceStatus::Alive,
        }
    }

    pub fn with_port(mut self, port: Port) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.proxy_mode = mode;
        self
    }

    pub fn with_updated(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = updated;
        self
    }

    pub fn is_alive(&self) -> bool {
        self.status == ServiceStatus::Alive
    }

    pub fn is_tombstone(&self) -> bool {
        self.status == ServiceStatus::Tombstone
    }

    /// Mark the service as removed.
    ///
    /// The new timestamp is at least one microsecond past the previous one so
    /// the tombstone always wins the merge against the fact it replaces.
    pub fn tombstone(&mut self) {
        self.tombstone_at(Utc::now());
    }

    pub fn tombstone_at(&mut self, now: DateTime<Utc>) {
        self.status = ServiceStatus::Tombstone;
        self.updated = now.max(self.updated + Duration::microseconds(1));
    }

    /// Whether `other` differs in anything a consumer can observe
    pub fn differs_observably(&self, other: &Service) -> bool {
        self.status != other.status
            || self.proxy_mode != other.proxy_mode
            || self.ports != other.ports
    }

    pub fn invalidates(&self, other: &Service) -> bool {
        self.updated > other.updated
    }
}
