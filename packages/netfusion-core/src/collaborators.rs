//! Contracts for the discovery sources and the persistence facade the
//! engine depends on.
//!
//! The engine never probes the network itself. Every signal arrives through
//! one of these traits, and any of them may fail or be absent; failures are
//! treated as "no signal" by the orchestrator.

use crate::scanner::device::{DeviceRecord, PortDescriptor, ServiceMetadata};
use crate::scanner::fusion::canonical_ip;
use crate::scanner::Subnet;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Liveness probe across a subnet
#[async_trait]
pub trait LivenessProber: Send + Sync {
    async fn probe_liveness(&self, subnet: &Subnet) -> Result<HashSet<String>>;
}

/// Hardware address resolution
#[async_trait]
pub trait MacResolver: Send + Sync {
    /// Map each resolvable IP to its MAC. Unresolved IPs are simply absent.
    async fn resolve_macs(&self, ips: &[String]) -> Result<HashMap<String, String>>;
}

/// Port probing for a single host
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe_ports(&self, host: &str, ports: &[u16]) -> Result<Vec<PortDescriptor>>;
}

/// Reverse name resolution, optional
#[async_trait]
pub trait HostnameResolver: Send + Sync {
    async fn resolve_hostname(&self, ip: &str) -> Option<String>;
}

/// One host seen by zero-configuration service discovery
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceObservation {
    pub hostname: Option<String>,
    pub services: Vec<String>,
    pub metadata: Option<ServiceMetadata>,
}

/// Everything a service discovery run produced, keyed by IP
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDiscoveryResult {
    hosts: BTreeMap<String, ServiceObservation>,
}

impl ServiceDiscoveryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, ip: impl Into<String>, observation: ServiceObservation) {
        self.hosts.insert(ip.into(), observation);
    }

    /// Re-key every host by its canonical address.
    pub fn into_canonical(self) -> Self {
        let hosts = self
            .hosts
            .into_iter()
            .map(|(ip, observation)| (canonical_ip(&ip).to_string(), observation))
            .collect();
        Self { hosts }
    }

    pub fn discovered_ips(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn services(&self, ip: &str) -> &[String] {
        self.hosts
            .get(ip)
            .map(|h| h.services.as_slice())
            .unwrap_or_default()
    }

    pub fn metadata(&self, ip: &str) -> Option<&ServiceMetadata> {
        self.hosts.get(ip).and_then(|h| h.metadata.as_ref())
    }

    pub fn hostname(&self, ip: &str) -> Option<&str> {
        self.hosts.get(ip).and_then(|h| h.hostname.as_deref())
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.hosts.contains_key(ip)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Auxiliary zero-configuration discovery (mDNS/Bonjour style)
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn discover_services(&self) -> Result<ServiceDiscoveryResult>;
}

/// Persistence and notification facade.
///
/// Calls are best-effort and must not block; errors are logged by the
/// caller and never interrupt a scan.
pub trait DeviceStore: Send + Sync {
    fn first_seen(&self, device: &DeviceRecord) -> Option<DateTime<Utc>>;
    fn is_known(&self, device: &DeviceRecord) -> bool;
    fn upsert(&self, device: &DeviceRecord) -> Result<()>;
    fn record_network_observation(&self, subnet_prefix: &str, device_count: usize) -> Result<()>;
    fn notify_scan_complete(&self, device_count: usize, threat_count: usize) -> Result<()>;
}

/// Service discovery that is not available on this host
pub struct NoServiceDiscovery;

#[async_trait]
impl ServiceDiscovery for NoServiceDiscovery {
    async fn discover_services(&self) -> Result<ServiceDiscoveryResult> {
        Ok(ServiceDiscoveryResult::new())
    }
}
