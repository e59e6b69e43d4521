//! Network scanning module.
//!
//! Drives multi-phase discovery over a device registry:
//! - Liveness sweep of a subnet
//! - MAC address and hostname resolution
//! - Zero-configuration service metadata
//! - Bounded-concurrency port scanning
//! - Fusion, classification and persistence of the results

pub mod classify;
pub mod device;
pub mod fusion;
pub mod oui;
pub mod ports;
pub mod session;

pub use device::{DeviceRecord, DeviceType, PortDescriptor, PortState, Protocol, ServiceMetadata};
pub use ports::PortList;
pub use session::{ProgressCallback, ScanKind, ScanPhase, ScanSession};

use crate::collaborators::{
    DeviceStore, HostnameResolver, LivenessProber, MacResolver, PortProber, ServiceDiscovery,
    ServiceDiscoveryResult,
};
use crate::config::ScanConfig;
use crate::error::ScanError;
use chrono::{DateTime, Utc};
use device::{compare_ips, sort_by_ip, RawDiscoveryRecord};
use futures::stream::{self, StreamExt};
use fusion::canonical_ip;
use ipnetwork::Ipv4Network;
use oui::OuiLookup;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};

/// Largest number of addresses a liveness sweep will cover
const MAX_SWEEP_HOSTS: usize = 4096;

/// Reverse lookups in flight at once
const HOSTNAME_PARALLELISM: usize = 32;

/// An IPv4 network to sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    network: Ipv4Network,
}

impl Subnet {
    /// Parse `192.168.1.0/24`, `192.168.1` (a /24 prefix) or a bare address
    /// (the /24 around it).
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let trimmed = input.trim();
        let invalid = || ScanError::InvalidSubnet(input.to_string());

        let network: Ipv4Network = if trimmed.contains('/') {
            trimmed.parse().map_err(|_| invalid())?
        } else {
            let octets = trimmed.split('.').filter(|o| !o.is_empty()).count();
            let address = match octets {
                3 => format!("{}.0", trimmed.trim_end_matches('.')),
                4 => trimmed.to_string(),
                _ => return Err(invalid()),
            };
            let ip: Ipv4Addr = address.parse().map_err(|_| invalid())?;
            Ipv4Network::new(ip, 24).map_err(|_| invalid())?
        };

        let network = Ipv4Network::new(network.network(), network.prefix()).map_err(|_| invalid())?;
        Ok(Self { network })
    }

    /// The `a.b.c` prefix for /24 and narrower networks, the CIDR otherwise.
    pub fn prefix(&self) -> String {
        if self.network.prefix() >= 24 {
            let [a, b, c, _] = self.network.network().octets();
            format!("{}.{}.{}", a, b, c)
        } else {
            self.network.to_string()
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        canonical_ip(ip)
            .parse::<Ipv4Addr>()
            .map(|addr| self.network.contains(addr))
            .unwrap_or(false)
    }

    /// Usable host addresses, skipping the network and broadcast addresses.
    pub fn hosts(&self) -> Vec<String> {
        let network = self.network.network();
        let broadcast = self.network.broadcast();
        let skip_edges = self.network.prefix() < 31;

        self.network
            .iter()
            .filter(|ip| !skip_edges || (*ip != network && *ip != broadcast))
            .take(MAX_SWEEP_HOSTS)
            .map(|ip| ip.to_string())
            .collect()
    }

    pub fn host_count(&self) -> usize {
        self.hosts().len()
    }

    /// Whether `ip` is one of the addresses [`Subnet::hosts`] yields.
    ///
    /// Networks wider than the sweep cap are only partly swept, so only
    /// these addresses can be judged offline by a sweep.
    pub fn sweeps(&self, ip: &str) -> bool {
        let Ok(addr) = canonical_ip(ip).parse::<Ipv4Addr>() else {
            return false;
        };
        if !self.network.contains(addr) {
            return false;
        }

        let offset = u32::from(addr) - u32::from(self.network.network());
        let cap = MAX_SWEEP_HOSTS as u32;
        if self.network.prefix() < 31 {
            addr != self.network.broadcast() && (1..=cap).contains(&offset)
        } else {
            offset < cap
        }
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.network)
    }
}

/// The discovery sources and persistence facade an orchestrator uses
#[derive(Clone)]
pub struct Collaborators {
    pub liveness: Arc<dyn LivenessProber>,
    pub mac_resolver: Arc<dyn MacResolver>,
    pub service_discovery: Arc<dyn ServiceDiscovery>,
    pub port_prober: Arc<dyn PortProber>,
    pub hostname_resolver: Option<Arc<dyn HostnameResolver>>,
    pub store: Arc<dyn DeviceStore>,
}

/// Outcome of a completed scan workflow
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub kind: ScanKind,
    /// Devices the workflow observed, sorted by IP
    pub devices: Vec<DeviceRecord>,
    pub threats_detected: usize,
    pub elapsed_secs: f64,
}

/// Owns the device registry and runs scan workflows against it.
///
/// Only one scan runs at a time per orchestrator; a second request while
/// one is in flight fails with [`ScanError::ScanInProgress`]. Readers can
/// take registry snapshots and watch the session at any time.
pub struct ScanOrchestrator {
    config: ScanConfig,
    oui: OuiLookup,
    collaborators: Collaborators,
    registry: RwLock<HashMap<String, DeviceRecord>>,
    scan_lock: Mutex<()>,
    session: watch::Sender<ScanSession>,
    on_progress: Option<ProgressCallback>,
}

/// A running scan: holds the scan lock and reports progress.
struct ScanRun<'a> {
    orchestrator: &'a ScanOrchestrator,
    kind: ScanKind,
    started: Instant,
    _guard: MutexGuard<'a, ()>,
}

impl ScanRun<'_> {
    fn phase(&self, phase: ScanPhase, fraction: f64, status: impl Into<String>) {
        let status = status.into();
        tracing::info!("[Scan] {}", status);
        let elapsed = self.started.elapsed().as_secs_f64();
        self.orchestrator.update_session(|s| {
            s.phase = phase;
            s.progress = s.progress.max(phase.progress_at(fraction));
            s.status = status;
            s.elapsed_secs = elapsed;
        });
    }

    fn counters(&self, scanned_hosts: usize, hosts_alive: usize) {
        self.orchestrator.update_session(|s| {
            s.scanned_hosts = scanned_hosts;
            s.hosts_alive = hosts_alive;
        });
    }
}

impl ScanOrchestrator {
    pub fn new(config: ScanConfig, collaborators: Collaborators) -> Self {
        let oui = config.oui_lookup();
        let (session, _) = watch::channel(ScanSession::default());
        Self {
            config,
            oui,
            collaborators,
            registry: RwLock::new(HashMap::new()),
            scan_lock: Mutex::new(()),
            session,
            on_progress: None,
        }
    }

    /// Seed the registry, e.g. from persisted state. Records are deduplicated.
    pub fn with_registry(mut self, devices: Vec<DeviceRecord>) -> Self {
        let devices = fusion::deduplicate(devices);
        tracing::debug!("Registry seeded with {} devices", devices.len());
        *self.registry.get_mut() = devices.into_iter().map(|d| (d.ip.clone(), d)).collect();
        self
    }

    pub fn with_oui_lookup(mut self, oui: OuiLookup) -> Self {
        self.oui = oui;
        self
    }

    /// Receive every session update.
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Current session state
    pub fn session(&self) -> ScanSession {
        self.session.borrow().clone()
    }

    /// Watch session updates
    pub fn subscribe(&self) -> watch::Receiver<ScanSession> {
        self.session.subscribe()
    }

    /// Snapshot of the registry, sorted by IP
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        let registry = self.registry.read().await;
        let mut devices: Vec<_> = registry.values().cloned().collect();
        sort_by_ip(&mut devices);
        devices
    }

    pub async fn device(&self, ip: &str) -> Option<DeviceRecord> {
        self.registry.read().await.get(canonical_ip(ip)).cloned()
    }

    /// Liveness sweep only. Responding hosts come back online (or are
    /// inserted as skeletal records); swept registry hosts that did not
    /// respond go offline. A failed sweep leaves the registry untouched.
    pub async fn quick_scan(&self, subnet: &str) -> Result<ScanResult, ScanError> {
        let subnet = Subnet::parse(subnet)?;
        let run = self.begin(ScanKind::Quick)?;

        let Some(alive) = self.sweep(&run, &subnet).await else {
            return Ok(self.finish(run, Vec::new()));
        };

        run.phase(ScanPhase::Merging, 0.0, "Updating device registry...");
        let now = Utc::now();
        let observed = alive.iter().map(|ip| DeviceRecord::new(ip.as_str(), now)).collect();
        let registry = self
            .reconcile_registry(observed, now, |ip| subnet.sweeps(ip))
            .await;

        let alive_set: HashSet<&str> = alive.iter().map(String::as_str).collect();
        let devices: Vec<_> = registry
            .into_iter()
            .filter(|d| alive_set.contains(d.ip.as_str()))
            .collect();

        self.record_observation(&subnet, devices.len());
        Ok(self.finish(run, devices))
    }

    /// Every phase with the standard port list.
    pub async fn full_scan(&self, subnet: &str) -> Result<ScanResult, ScanError> {
        let subnet = Subnet::parse(subnet)?;
        let ports = self.config.standard_port_list();
        self.run_full(ScanKind::Full, subnet, ports).await
    }

    /// Every phase with a named custom port list from the configuration.
    pub async fn preset_scan(&self, subnet: &str, preset: &str) -> Result<ScanResult, ScanError> {
        let subnet = Subnet::parse(subnet)?;
        let ports = self.config.preset(preset)?;
        self.run_full(ScanKind::Preset, subnet, ports).await
    }

    /// Re-probe the standard ports of every registered host.
    pub async fn port_scan(&self) -> Result<ScanResult, ScanError> {
        let ports = self.config.standard_port_list();
        self.rescan_registry(ScanKind::Port, ports).await
    }

    /// Re-probe every TCP port of every registered host.
    pub async fn deep_scan(&self) -> Result<ScanResult, ScanError> {
        self.rescan_registry(ScanKind::Deep, PortList::Full).await
    }

    /// MAC, hostname and port scan of one address.
    pub async fn single_host_scan(&self, ip: &str) -> Result<ScanResult, ScanError> {
        let ip = canonical_ip(ip).to_string();
        if ip.parse::<IpAddr>().is_err() {
            return Err(ScanError::InvalidAddress(ip));
        }
        let run = self.begin(ScanKind::SingleHost)?;
        let targets = vec![ip.clone()];

        run.phase(ScanPhase::MacResolution, 0.0, format!("Resolving {}...", ip));
        let macs = self.resolve_macs(&targets).await;
        let hostnames = self.resolve_hostnames(&targets).await;
        run.phase(ScanPhase::MacResolution, 1.0, format!("Resolved {}", ip));

        let ports = self.config.standard_port_list();
        let results = self.scan_ports(&run, targets, &ports).await;

        run.phase(ScanPhase::Merging, 0.0, "Merging results...");
        let now = Utc::now();
        let observed: Vec<_> = results
            .into_iter()
            .map(|result| {
                let mut record = DeviceRecord::new(result.ip.as_str(), now);
                record.mac = macs.get(&result.ip).cloned();
                record.hostname = hostnames.get(&result.ip).cloned();
                record.is_online = record.mac.is_some() || !result.ports.is_empty();
                record.open_ports = result.ports;
                record
            })
            .collect();

        let devices = self.merge_into_registry(observed, None).await;
        Ok(self.finish(run, devices))
    }

    /// Reconcile an externally discovered address set against the registry
    /// without probing anything.
    pub async fn import_incremental<I, S>(&self, discovered: I) -> Result<ScanResult, ScanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let run = self.begin(ScanKind::Import)?;
        run.phase(ScanPhase::Merging, 0.0, "Importing discovered hosts...");

        let now = Utc::now();
        let mut observed = Vec::new();
        for ip in discovered {
            let ip = ip.as_ref().trim();
            if canonical_ip(ip).parse::<IpAddr>().is_err() {
                tracing::warn!("Skipping invalid imported address '{}'", ip);
                continue;
            }
            observed.push(DeviceRecord::new(ip, now));
        }
        let imported = observed.len();

        let devices = self.reconcile_registry(observed, now, |_| true).await;
        run.counters(imported, devices.iter().filter(|d| d.is_online).count());
        Ok(self.finish(run, devices))
    }

    fn begin(&self, kind: ScanKind) -> Result<ScanRun<'_>, ScanError> {
        let guard = self.scan_lock.try_lock().map_err(|_| {
            tracing::warn!("Rejected {:?} scan: another scan is in progress", kind);
            ScanError::ScanInProgress
        })?;

        self.update_session(|s| {
            *s = ScanSession {
                kind: Some(kind),
                status: "Starting scan...".to_string(),
                ..ScanSession::default()
            };
        });

        Ok(ScanRun {
            orchestrator: self,
            kind,
            started: Instant::now(),
            _guard: guard,
        })
    }

    fn update_session(&self, apply: impl FnOnce(&mut ScanSession)) {
        self.session.send_modify(apply);
        if let Some(callback) = &self.on_progress {
            let snapshot = self.session.borrow().clone();
            callback(&snapshot);
        }
    }

    fn finish(&self, run: ScanRun<'_>, devices: Vec<DeviceRecord>) -> ScanResult {
        let threats = self.count_threats(&devices);
        if let Err(e) = self
            .collaborators
            .store
            .notify_scan_complete(devices.len(), threats)
        {
            tracing::warn!("Failed to deliver scan completion: {:#}", e);
        }

        let elapsed_secs = run.started.elapsed().as_secs_f64();
        self.update_session(|s| s.threats_detected = threats);
        run.phase(
            ScanPhase::Complete,
            1.0,
            format!(
                "Scan complete: {} devices found in {:.1}s",
                devices.len(),
                elapsed_secs
            ),
        );

        ScanResult {
            kind: run.kind,
            devices,
            threats_detected: threats,
            elapsed_secs,
        }
    }

    fn count_threats(&self, devices: &[DeviceRecord]) -> usize {
        devices
            .iter()
            .filter(|d| d.is_online && d.exposes_any(&self.config.risky_ports))
            .count()
    }

    async fn run_full(
        &self,
        kind: ScanKind,
        subnet: Subnet,
        ports: PortList,
    ) -> Result<ScanResult, ScanError> {
        let run = self.begin(kind)?;

        let Some(alive) = self.sweep(&run, &subnet).await else {
            return Ok(self.finish(run, Vec::new()));
        };
        if alive.is_empty() {
            tracing::info!("No hosts responded in {}, skipping remaining phases", subnet);
            self.record_observation(&subnet, 0);
            return Ok(self.finish(run, Vec::new()));
        }

        run.phase(
            ScanPhase::MacResolution,
            0.0,
            format!("Resolving MAC addresses for {} hosts...", alive.len()),
        );
        let macs = self.resolve_macs(&alive).await;
        run.phase(
            ScanPhase::MacResolution,
            0.5,
            format!("Resolved {}/{} MAC addresses", macs.len(), alive.len()),
        );
        let unnamed = self.hosts_without_hostname(&alive).await;
        let hostnames = self.resolve_hostnames(&unnamed).await;
        run.phase(
            ScanPhase::MacResolution,
            1.0,
            format!("Resolved {}/{} hostnames", hostnames.len(), unnamed.len()),
        );

        run.phase(ScanPhase::ServiceDiscovery, 0.0, "Discovering services...");
        let services = self.discover_services().await;
        let mut targets = alive.clone();
        for ip in services.discovered_ips() {
            if subnet.contains(ip) && !targets.iter().any(|t| t == ip) {
                targets.push(ip.to_string());
            }
        }
        targets.sort_by(|a, b| compare_ips(a, b));
        run.phase(
            ScanPhase::ServiceDiscovery,
            1.0,
            format!("Service discovery found {} hosts", services.len()),
        );

        let registered: HashSet<String> = self.registry.read().await.keys().cloned().collect();
        let results = self.scan_ports(&run, targets, &ports).await;

        run.phase(ScanPhase::Merging, 0.0, "Merging results...");
        let now = Utc::now();
        let mut dropped = 0;
        let mut observed = Vec::with_capacity(results.len());
        for result in results {
            let corroborated = services.contains(&result.ip);
            let known = registered.contains(canonical_ip(&result.ip));
            if !ports::retain_in_full_scan(&result, corroborated, known) {
                dropped += 1;
                continue;
            }

            let mut record = DeviceRecord::new(result.ip.as_str(), now);
            record.mac = macs.get(&result.ip).cloned();
            record.hostname = hostnames
                .get(&result.ip)
                .cloned()
                .or_else(|| services.hostname(&result.ip).map(String::from));
            let advertised = services.services(&result.ip);
            if let Some(metadata) = services.metadata(&result.ip) {
                let mut metadata = metadata.clone();
                for service in advertised {
                    if !metadata.services.contains(service) {
                        metadata.services.push(service.clone());
                    }
                }
                record.display_name = Some(metadata.name.clone());
                record.service_metadata = Some(metadata);
            } else if !advertised.is_empty() {
                tracing::debug!("{} advertises {}", result.ip, advertised.join(", "));
            }
            record.open_ports = result.ports;
            observed.push(record);
        }
        if dropped > 0 {
            tracing::debug!("Dropped {} hosts with no open ports and no corroboration", dropped);
        }

        let devices = self.merge_into_registry(observed, Some(&subnet)).await;
        self.record_observation(&subnet, devices.len());
        Ok(self.finish(run, devices))
    }

    async fn rescan_registry(&self, kind: ScanKind, ports: PortList) -> Result<ScanResult, ScanError> {
        let run = self.begin(kind)?;
        let targets: Vec<String> = self.devices().await.into_iter().map(|d| d.ip).collect();
        run.counters(targets.len(), 0);

        let results = self.scan_ports(&run, targets, &ports).await;

        run.phase(ScanPhase::Merging, 0.0, "Merging results...");
        let now = Utc::now();
        let observed: Vec<_> = results
            .into_iter()
            .filter(|r| !r.ports.is_empty())
            .map(|result| {
                let mut record = DeviceRecord::new(result.ip.as_str(), now);
                record.open_ports = result.ports;
                record
            })
            .collect();
        run.counters(self.session().scanned_hosts, observed.len());

        let devices = self.merge_into_registry(observed, None).await;
        Ok(self.finish(run, devices))
    }

    /// Liveness pass over `subnet`. `None` when the prober failed, which is
    /// no evidence about any host.
    async fn sweep(&self, run: &ScanRun<'_>, subnet: &Subnet) -> Option<Vec<String>> {
        run.phase(
            ScanPhase::Pinging,
            0.0,
            format!("Discovering devices on {} (ping sweep)...", subnet),
        );

        let alive = match self.collaborators.liveness.probe_liveness(subnet).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!("Liveness probe failed: {:#}", e);
                run.phase(ScanPhase::Pinging, 1.0, "Liveness probe unavailable");
                return None;
            }
        };

        let mut alive: Vec<String> = alive
            .iter()
            .map(|ip| canonical_ip(ip).to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        alive.sort_by(|a, b| compare_ips(a, b));

        run.counters(subnet.host_count(), alive.len());
        run.phase(
            ScanPhase::Pinging,
            1.0,
            format!("Discovered {} responding hosts", alive.len()),
        );
        Some(alive)
    }

    async fn scan_ports(
        &self,
        run: &ScanRun<'_>,
        targets: Vec<String>,
        port_list: &PortList,
    ) -> Vec<ports::HostPorts> {
        let ports = port_list.ports();
        run.phase(
            ScanPhase::PortScanning,
            0.0,
            format!(
                "Scanning {} {} ports on {} hosts...",
                ports.len(),
                port_list.label(),
                targets.len()
            ),
        );

        ports::scan_hosts(
            targets,
            ports,
            self.config.concurrency,
            Arc::clone(&self.collaborators.port_prober),
            |done, total| {
                run.phase(
                    ScanPhase::PortScanning,
                    done as f64 / total.max(1) as f64,
                    format!("Port scanned {}/{} hosts", done, total),
                )
            },
        )
        .await
    }

    async fn resolve_macs(&self, ips: &[String]) -> HashMap<String, String> {
        match self.collaborators.mac_resolver.resolve_macs(ips).await {
            Ok(macs) => macs
                .into_iter()
                .map(|(ip, mac)| (canonical_ip(&ip).to_string(), mac))
                .collect(),
            Err(e) => {
                tracing::warn!("MAC resolution failed: {:#}", e);
                HashMap::new()
            }
        }
    }

    async fn hosts_without_hostname(&self, ips: &[String]) -> Vec<String> {
        let registry = self.registry.read().await;
        ips.iter()
            .filter(|ip| {
                registry
                    .get(ip.as_str())
                    .and_then(|d| d.hostname.as_ref())
                    .is_none()
            })
            .cloned()
            .collect()
    }

    /// Reverse lookups, each bounded by the configured timeout.
    async fn resolve_hostnames(&self, ips: &[String]) -> HashMap<String, String> {
        let Some(resolver) = &self.collaborators.hostname_resolver else {
            return HashMap::new();
        };
        let limit = self.config.hostname_timeout();

        stream::iter(ips.iter().cloned())
            .map(|ip| {
                let resolver = Arc::clone(resolver);
                async move {
                    let name = tokio::time::timeout(limit, resolver.resolve_hostname(&ip))
                        .await
                        .ok()
                        .flatten();
                    (ip, name)
                }
            })
            .buffer_unordered(HOSTNAME_PARALLELISM)
            .filter_map(|(ip, name)| async move {
                name.filter(|n| !n.trim().is_empty() && !fusion::is_address_shaped(n))
                    .map(|n| (ip, n))
            })
            .collect()
            .await
    }

    async fn discover_services(&self) -> ServiceDiscoveryResult {
        match self.collaborators.service_discovery.discover_services().await {
            Ok(found) => found.into_canonical(),
            Err(e) => {
                tracing::warn!("Service discovery unavailable: {:#}", e);
                ServiceDiscoveryResult::new()
            }
        }
    }

    /// Fold observations into the registry, one host group at a time.
    ///
    /// Each existing record is merged first, so its hostname and history
    /// take precedence while ports accumulate. When `pass_scope` is given,
    /// registry hosts it swept that were not observed go offline.
    async fn merge_into_registry(
        &self,
        observed: Vec<RawDiscoveryRecord>,
        pass_scope: Option<&Subnet>,
    ) -> Vec<DeviceRecord> {
        let mut groups: HashMap<String, Vec<RawDiscoveryRecord>> = HashMap::new();
        for record in observed {
            groups
                .entry(canonical_ip(&record.ip).to_string())
                .or_default()
                .push(record);
        }

        let mut registry = self.registry.write().await;
        let mut touched = Vec::with_capacity(groups.len());

        for (key, members) in groups {
            let mut group = Vec::with_capacity(members.len() + 1);
            if let Some(existing) = registry.remove(&key) {
                group.push(existing);
            }
            group.extend(members);

            let Some(mut device) = fusion::merge_group(group) else {
                continue;
            };
            self.enrich(&mut device);
            device.device_type = device.device_type.refine(classify::classify_device(&device));
            self.apply_history(&mut device);

            registry.insert(device.ip.clone(), device.clone());
            touched.push(device);
        }

        if let Some(subnet) = pass_scope {
            let seen: HashSet<String> = touched.iter().map(|d| d.ip.clone()).collect();
            for device in registry.values_mut() {
                if device.is_online && subnet.sweeps(&device.ip) && !seen.contains(&device.ip) {
                    tracing::debug!("{} went offline", device.ip);
                    device.is_online = false;
                    self.persist(device);
                }
            }
        }
        drop(registry);

        sort_by_ip(&mut touched);
        for device in &touched {
            self.persist(device);
        }
        touched
    }

    /// Reconcile a discovery pass against the whole registry and persist
    /// the result. Returns the reconciled registry, sorted by IP.
    async fn reconcile_registry<F>(
        &self,
        observed: Vec<RawDiscoveryRecord>,
        now: DateTime<Utc>,
        in_scope: F,
    ) -> Vec<DeviceRecord>
    where
        F: Fn(&str) -> bool,
    {
        let mut registry = self.registry.write().await;
        let existing: Vec<_> = registry.drain().map(|(_, d)| d).collect();

        let mut reconciled = fusion::reconcile_within(existing, observed, now, in_scope);
        for device in reconciled.iter_mut() {
            self.enrich(device);
            self.apply_history(device);
        }

        *registry = reconciled.iter().map(|d| (d.ip.clone(), d.clone())).collect();
        drop(registry);

        for device in &reconciled {
            self.persist(device);
        }
        reconciled
    }

    /// Manufacturer always follows the MAC's OUI.
    fn enrich(&self, device: &mut DeviceRecord) {
        if let Some(mac) = &device.mac {
            device.manufacturer = self.oui.lookup(mac);
        }
    }

    fn apply_history(&self, device: &mut DeviceRecord) {
        let store = &self.collaborators.store;
        if let Some(first_seen) = store.first_seen(device) {
            device.first_seen = device.first_seen.min(first_seen);
        }
        device.is_known |= store.is_known(device);
    }

    fn persist(&self, device: &DeviceRecord) {
        if let Err(e) = self.collaborators.store.upsert(device) {
            tracing::warn!("Failed to persist {}: {:#}", device.ip, e);
        }
    }

    fn record_observation(&self, subnet: &Subnet, device_count: usize) {
        if let Err(e) = self
            .collaborators
            .store
            .record_network_observation(&subnet.prefix(), device_count)
        {
            tracing::warn!("Failed to record observation for {}: {:#}", subnet, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_parse_forms() {
        let cidr = Subnet::parse("192.168.1.0/24").unwrap();
        assert_eq!(Subnet::parse("192.168.1").unwrap(), cidr);
        assert_eq!(Subnet::parse("192.168.1.77").unwrap(), cidr);
        assert_eq!(Subnet::parse("192.168.1.77/24").unwrap(), cidr);
        assert_eq!(cidr.prefix(), "192.168.1");
        assert_eq!(cidr.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_subnet_parse_rejects_garbage() {
        assert!(matches!(Subnet::parse("banana"), Err(ScanError::InvalidSubnet(_))));
        assert!(matches!(Subnet::parse("10.0"), Err(ScanError::InvalidSubnet(_))));
        assert!(matches!(Subnet::parse("10.0.0.0/40"), Err(ScanError::InvalidSubnet(_))));
    }

    #[test]
    fn test_subnet_hosts_skip_edges() {
        let subnet = Subnet::parse("10.1.2.0/24").unwrap();
        let hosts = subnet.hosts();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().map(String::as_str), Some("10.1.2.1"));
        assert_eq!(hosts.last().map(String::as_str), Some("10.1.2.254"));
    }

    #[test]
    fn test_subnet_contains_canonical() {
        let subnet = Subnet::parse("10.1.2").unwrap();
        assert!(subnet.contains("10.1.2.9$en0"));
        assert!(!subnet.contains("10.1.3.9"));
        assert!(!subnet.contains("nas.local"));
    }

    #[test]
    fn test_wide_subnet_prefix_is_cidr() {
        let subnet = Subnet::parse("10.0.0.0/16").unwrap();
        assert_eq!(subnet.prefix(), "10.0.0.0/16");
        assert_eq!(subnet.hosts().len(), MAX_SWEEP_HOSTS);
    }

    #[test]
    fn test_sweeps_matches_hosts() {
        let narrow = Subnet::parse("10.1.2.0/24").unwrap();
        assert!(narrow.sweeps("10.1.2.1"));
        assert!(narrow.sweeps("10.1.2.254%eth0"));
        assert!(!narrow.sweeps("10.1.2.0"));
        assert!(!narrow.sweeps("10.1.2.255"));
        assert!(!narrow.sweeps("10.1.3.1"));

        let wide = Subnet::parse("10.0.0.0/16").unwrap();
        let hosts = wide.hosts();
        assert!(hosts.iter().all(|ip| wide.sweeps(ip)));
        let last = hosts.last().unwrap();
        assert_eq!(last, "10.0.16.0");
        assert!(!wide.sweeps("10.0.16.1"));
        assert!(!wide.sweeps("10.0.200.5"));
        assert!(wide.contains("10.0.200.5"));

        let point = Subnet::parse("10.0.0.7/32").unwrap();
        assert_eq!(point.hosts(), vec!["10.0.0.7".to_string()]);
        assert!(point.sweeps("10.0.0.7"));
    }
}
