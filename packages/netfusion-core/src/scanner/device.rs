//! Device records and the observations they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Device category assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Router,
    Server,
    Computer,
    Mobile,
    Iot,
    Printer,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Keep an existing category when a later pass could not decide.
    pub fn refine(self, candidate: DeviceType) -> DeviceType {
        if candidate == DeviceType::Unknown {
            self
        } else {
            candidate
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceType::Router => "router",
            DeviceType::Server => "server",
            DeviceType::Computer => "computer",
            DeviceType::Mobile => "mobile",
            DeviceType::Iot => "iot",
            DeviceType::Printer => "printer",
            DeviceType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortState {
    Open,
    Closed,
    Filtered,
}

/// A single probed port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDescriptor {
    pub port: u16,
    pub protocol: Protocol,
    pub service: String,
    pub version: Option<String>,
    pub state: PortState,
}

impl PortDescriptor {
    /// An open TCP port with the well-known service name filled in.
    pub fn open(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            service: super::ports::service_name(port).to_string(),
            version: None,
            state: PortState::Open,
        }
    }
}

/// Metadata published by zero-configuration service discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub name: String,
    pub category: Option<String>,
    /// Service types advertised by the host (e.g. `_airplay._tcp`)
    #[serde(default)]
    pub services: Vec<String>,
    pub is_accessory: bool,
    pub discovered_at: DateTime<Utc>,
}

/// Canonical per-host record held in the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    /// Canonical address, never carries an interface suffix
    pub ip: String,
    pub mac: Option<String>,
    pub hostname: Option<String>,
    /// Vendor from MAC OUI lookup
    pub manufacturer: Option<String>,
    pub device_type: DeviceType,
    /// Sorted ascending, unique by port number
    pub open_ports: Vec<PortDescriptor>,
    pub is_online: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_known: bool,
    pub display_name: Option<String>,
    pub service_metadata: Option<ServiceMetadata>,
}

impl DeviceRecord {
    /// A skeletal online record seen for the first time at `now`.
    pub fn new(ip: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            ip: ip.into(),
            mac: None,
            hostname: None,
            manufacturer: None,
            device_type: DeviceType::Unknown,
            open_ports: Vec::new(),
            is_online: true,
            first_seen: now,
            last_seen: now,
            is_known: false,
            display_name: None,
            service_metadata: None,
        }
    }

    pub fn port_numbers(&self) -> Vec<u16> {
        self.open_ports.iter().map(|p| p.port).collect()
    }

    pub fn has_port(&self, port: u16) -> bool {
        self.open_ports.iter().any(|p| p.port == port)
    }

    pub fn exposes_any(&self, ports: &[u16]) -> bool {
        ports.iter().any(|&p| self.has_port(p))
    }
}

/// An unmerged observation from a single discovery source.
///
/// Same shape as [`DeviceRecord`], but `ip` may carry an interface
/// suffix such as `10.0.0.5$en1`.
pub type RawDiscoveryRecord = DeviceRecord;

/// Order two dotted addresses octet by octet, numerically.
///
/// Non-numeric segments fall back to text comparison; when one address is
/// a prefix of the other the shorter one sorts first.
pub fn compare_ips(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u32>(), r.parse::<u32>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// Sort records ascending by numeric IP.
pub fn sort_by_ip(devices: &mut [DeviceRecord]) {
    devices.sort_by(|a, b| compare_ips(&a.ip, &b.ip));
}
