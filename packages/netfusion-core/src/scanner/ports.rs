//! Port lists and the bounded-concurrency port scan coordinator.

use super::device::{compare_ips, PortDescriptor, PortState};
use crate::collaborators::PortProber;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Default in-flight host ceiling
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Ports probed by a standard scan
pub const STANDARD_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 67, 80, 110, 135, 139, 143, 161, 443, 445, 515, 548, 554, 631, 1883,
    1900, 2049, 3306, 3389, 3689, 5000, 5001, 5432, 5900, 6379, 7000, 7100, 8000, 8080, 8123,
    8443, 8883, 9100, 27017, 51826, 62078,
];

/// Which ports a scan probes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortList {
    /// The fixed default set (or the configured replacement for it)
    Standard(Vec<u16>),
    /// Every TCP port
    Full,
    /// A caller-supplied preset
    Custom(Vec<u16>),
}

impl Default for PortList {
    fn default() -> Self {
        PortList::Standard(STANDARD_PORTS.to_vec())
    }
}

impl PortList {
    pub fn ports(&self) -> Vec<u16> {
        match self {
            PortList::Standard(ports) | PortList::Custom(ports) => {
                let mut ports = ports.clone();
                ports.sort_unstable();
                ports.dedup();
                ports
            }
            PortList::Full => (1..=u16::MAX).collect(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PortList::Standard(_) => "standard",
            PortList::Full => "full",
            PortList::Custom(_) => "custom",
        }
    }
}

/// Well-known service name for a port, empty when unknown.
pub fn service_name(port: u16) -> &'static str {
    match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 => "smtp",
        53 => "dns",
        67 | 68 => "dhcp",
        80 => "http",
        110 => "pop3",
        135 => "msrpc",
        139 => "netbios-ssn",
        143 => "imap",
        161 => "snmp",
        443 => "https",
        445 => "smb",
        515 => "lpd",
        548 => "afp",
        554 => "rtsp",
        631 => "ipp",
        1433 => "mssql",
        1521 => "oracle",
        1880 => "node-red",
        1883 => "mqtt",
        1900 => "upnp",
        1935 => "rtmp",
        2049 => "nfs",
        3306 => "mysql",
        3389 => "rdp",
        3689 => "daap",
        5000 => "upnp-admin",
        5001 => "https-admin",
        5432 => "postgresql",
        5900 => "vnc",
        6379 => "redis",
        7000 => "airplay",
        7100 => "airplay-fonts",
        7447 => "rtsps",
        8000 => "http-alt",
        8080 => "http-proxy",
        8123 => "home-assistant",
        8443 => "https-alt",
        8554 => "rtsp-alt",
        8883 => "mqtts",
        9100 => "jetdirect",
        9200 => "elasticsearch",
        27017 => "mongodb",
        37777 => "dahua-dvr",
        51826 => "hap",
        62078 => "iphone-sync",
        _ => "",
    }
}

/// Open ports found on one host
#[derive(Debug, Clone, PartialEq)]
pub struct HostPorts {
    pub ip: String,
    pub ports: Vec<PortDescriptor>,
}

/// Probe `hosts` for `ports` with at most `concurrency` hosts in flight.
///
/// A single dispatcher keeps the in-flight set full, launching the next
/// pending host as soon as any task finishes. Results are folded by this
/// function alone, one at a time, and `on_progress(completed, total)` is
/// called after each fold. Probe failures yield an empty port list. The
/// returned list is sorted ascending by numeric IP.
pub async fn scan_hosts<F>(
    hosts: Vec<String>,
    ports: Vec<u16>,
    concurrency: usize,
    prober: Arc<dyn PortProber>,
    mut on_progress: F,
) -> Vec<HostPorts>
where
    F: FnMut(usize, usize),
{
    let total = hosts.len();
    let concurrency = concurrency.max(1);
    let ports: Arc<[u16]> = ports.into();

    tracing::info!(
        "Port scanning {} hosts ({} ports each, {} in flight)",
        total,
        ports.len(),
        concurrency
    );

    let spawn_probe = |ip: String| {
        let prober = Arc::clone(&prober);
        let ports = Arc::clone(&ports);
        async move {
            let task_ip = ip.clone();
            let handle = tokio::spawn(async move { prober.probe_ports(&task_ip, &ports).await });
            (ip, handle.await)
        }
    };

    let mut pending = hosts.into_iter();
    let mut in_flight = FuturesUnordered::new();
    for ip in pending.by_ref().take(concurrency) {
        in_flight.push(spawn_probe(ip));
    }

    let mut results = Vec::with_capacity(total);
    let mut completed = 0;

    while let Some((ip, outcome)) = in_flight.next().await {
        if let Some(next_ip) = pending.next() {
            in_flight.push(spawn_probe(next_ip));
        }

        let open = match outcome {
            Ok(Ok(found)) => open_only(found),
            Ok(Err(e)) => {
                tracing::debug!("Port probe failed for {}: {}", ip, e);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Port probe task for {} did not complete: {}", ip, e);
                Vec::new()
            }
        };

        tracing::debug!("{}: {} open ports", ip, open.len());
        results.push(HostPorts { ip, ports: open });

        completed += 1;
        on_progress(completed, total);
    }

    results.sort_by(|a, b| compare_ips(&a.ip, &b.ip));
    results
}

/// Keep open ports only, unique by number, ascending.
fn open_only(found: Vec<PortDescriptor>) -> Vec<PortDescriptor> {
    let mut seen = HashSet::new();
    let mut open: Vec<_> = found
        .into_iter()
        .filter(|p| p.state == PortState::Open)
        .filter(|p| seen.insert(p.port))
        .collect();
    open.sort_by_key(|p| p.port);
    open
}

/// Whether a full scan keeps a host in its enriched output.
///
/// Hosts with no open ports survive only when service discovery saw them
/// or the registry already tracks them.
pub fn retain_in_full_scan(
    result: &HostPorts,
    corroborated_by_metadata: bool,
    already_registered: bool,
) -> bool {
    !result.ports.is_empty() || corroborated_by_metadata || already_registered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::device::Protocol;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Prober that records how many probes run at once.
    struct CountingProber {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingProber {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PortProber for CountingProber {
        async fn probe_ports(&self, host: &str, ports: &[u16]) -> Result<Vec<PortDescriptor>> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);

            // Later hosts finish first so completion order differs from input order
            let last_octet: u64 = host.rsplit('.').next().and_then(|o| o.parse().ok()).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(last_octet % 40))).await;

            self.current.fetch_sub(1, Ordering::SeqCst);

            if host.ends_with(".13") {
                anyhow::bail!("host unreachable");
            }
            Ok(ports
                .iter()
                .filter(|p| **p % 2 == 0)
                .map(|p| PortDescriptor::open(*p))
                .collect())
        }
    }

    fn hosts(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("10.0.0.{}", i)).collect()
    }

    #[tokio::test]
    async fn test_never_exceeds_concurrency() {
        let prober = Arc::new(CountingProber::new());
        let results = scan_hosts(hosts(37), vec![22, 80], 4, prober.clone(), |_, _| {}).await;

        assert_eq!(results.len(), 37);
        assert_eq!(prober.calls.load(Ordering::SeqCst), 37);
        assert!(prober.peak.load(Ordering::SeqCst) <= 4);
        assert!(prober.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_output_sorted_by_numeric_ip() {
        let prober = Arc::new(CountingProber::new());
        let results = scan_hosts(hosts(25), vec![80], 10, prober, |_, _| {}).await;
        let ips: Vec<_> = results.iter().map(|r| r.ip.clone()).collect();
        assert_eq!(ips, hosts(25));
    }

    #[tokio::test]
    async fn test_progress_reaches_total_in_order() {
        let prober = Arc::new(CountingProber::new());
        let mut seen = Vec::new();
        scan_hosts(hosts(12), vec![80], 3, prober, |done, total| seen.push((done, total))).await;
        let expected: Vec<_> = (1..=12).map(|i| (i, 12)).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_failed_probe_degrades_to_no_ports() {
        let prober = Arc::new(CountingProber::new());
        let results = scan_hosts(hosts(13), vec![22, 80], 5, prober, |_, _| {}).await;
        let failed = results.iter().find(|r| r.ip == "10.0.0.13").unwrap();
        assert!(failed.ports.is_empty());
        let ok = results.iter().find(|r| r.ip == "10.0.0.1").unwrap();
        assert_eq!(ok.ports.iter().map(|p| p.port).collect::<Vec<_>>(), vec![22, 80]);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_clamped() {
        let prober = Arc::new(CountingProber::new());
        let results = scan_hosts(hosts(3), vec![80], 0, prober.clone(), |_, _| {}).await;
        assert_eq!(results.len(), 3);
        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_only_dedups_and_filters() {
        let mut closed = PortDescriptor::open(23);
        closed.state = PortState::Closed;
        let found = vec![
            PortDescriptor::open(443),
            PortDescriptor::open(80),
            closed,
            PortDescriptor::open(80),
        ];
        let open = open_only(found);
        assert_eq!(open.iter().map(|p| p.port).collect::<Vec<_>>(), vec![80, 443]);
        assert_eq!(open[0].protocol, Protocol::Tcp);
        assert_eq!(open[0].service, "http");
    }

    #[test]
    fn test_port_lists() {
        assert_eq!(PortList::Full.ports().len(), 65535);
        assert_eq!(PortList::Custom(vec![443, 80, 80]).ports(), vec![80, 443]);
        assert!(PortList::default().ports().contains(&53));
        assert_eq!(PortList::default().label(), "standard");
        assert_eq!(PortList::Custom(vec![80]).label(), "custom");
    }

    #[test]
    fn test_full_scan_retention() {
        let empty = HostPorts { ip: "10.0.0.9".into(), ports: vec![] };
        assert!(!retain_in_full_scan(&empty, false, false));
        assert!(retain_in_full_scan(&empty, true, false));
        assert!(retain_in_full_scan(&empty, false, true));
        let open = HostPorts { ip: "10.0.0.9".into(), ports: vec![PortDescriptor::open(80)] };
        assert!(retain_in_full_scan(&open, false, false));
    }
}
