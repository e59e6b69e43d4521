//! Ping sweep using system ping command

use super::{arp, hidden_command};
use crate::collaborators::LivenessProber;
use crate::scanner::Subnet;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Instant;

/// Hosts pinged in parallel
const BATCH_SIZE: usize = 50;

/// Liveness via ICMP echo, topped up with the ARP cache for hosts that
/// drop pings.
#[derive(Debug, Clone)]
pub struct SystemPingProber {
    batch_size: usize,
    include_arp_cache: bool,
}

impl Default for SystemPingProber {
    fn default() -> Self {
        Self {
            batch_size: BATCH_SIZE,
            include_arp_cache: true,
        }
    }
}

impl SystemPingProber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LivenessProber for SystemPingProber {
    async fn probe_liveness(&self, subnet: &Subnet) -> Result<HashSet<String>> {
        let ips = subnet.hosts();
        let total_hosts = ips.len();
        tracing::info!("Pinging {} hosts in subnet {}", total_hosts, subnet);

        let mut alive = HashSet::new();
        let mut completed = 0;

        for (batch_idx, batch) in ips.chunks(self.batch_size.max(1)).enumerate() {
            let handles: Vec<_> = batch
                .iter()
                .map(|ip| {
                    let ip = ip.clone();
                    tokio::spawn(async move {
                        let replied = ping_host(&ip).await;
                        replied.then_some(ip)
                    })
                })
                .collect();

            let mut batch_found = 0;
            for handle in handles {
                if let Ok(Some(ip)) = handle.await {
                    alive.insert(ip);
                    batch_found += 1;
                }
            }

            completed += batch.len();
            if batch_found > 0 || (batch_idx + 1) % 3 == 0 {
                tracing::debug!(
                    "Ping progress: {}/{} hosts checked, {} responding",
                    completed,
                    total_hosts,
                    alive.len()
                );
            }
        }

        if self.include_arp_cache {
            match arp::read_arp_table().await {
                Ok(table) => {
                    let before = alive.len();
                    alive.extend(table.into_keys().filter(|ip| subnet.contains(ip)));
                    if alive.len() > before {
                        tracing::debug!("ARP cache added {} silent hosts", alive.len() - before);
                    }
                }
                Err(e) => tracing::debug!("ARP cache unavailable: {:#}", e),
            }
        }

        Ok(alive)
    }
}

/// Ping a single host using the system ping command.
async fn ping_host(ip: &str) -> bool {
    let ip_owned = ip.to_string();

    let result = tokio::task::spawn_blocking(move || {
        let start = Instant::now();

        #[cfg(target_os = "windows")]
        let output = hidden_command("ping")
            .args(["-n", "1", "-w", "1000", &ip_owned])
            .output();

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let output = hidden_command("ping")
            .args(["-c", "1", "-W", "1", &ip_owned])
            .output();

        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        let output: std::io::Result<std::process::Output> = Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform",
        ));

        let Ok(output) = output else {
            return false;
        };
        let output_str = String::from_utf8_lossy(&output.stdout);

        if !reply_received(&output_str, output.status.success()) {
            return false;
        }

        let rtt = parse_ping_time(&output_str)
            .unwrap_or_else(|| start.elapsed().as_secs_f64() * 1000.0);
        tracing::trace!("{} replied in {:.1}ms", ip_owned, rtt);
        true
    })
    .await;

    result.unwrap_or(false)
}

/// Whether ping output shows an echo reply.
///
/// Windows ping exits 0 even for "Destination host unreachable", so its
/// output is inspected instead of the exit status.
fn reply_received(output: &str, exit_success: bool) -> bool {
    if cfg!(target_os = "windows") {
        let lower = output.to_lowercase();
        lower.contains("reply from")
            && !lower.contains("destination host unreachable")
            && !lower.contains("request timed out")
    } else {
        exit_success
    }
}

/// Parse ping response time from command output
fn parse_ping_time(output: &str) -> Option<f64> {
    output
        .split_whitespace()
        .filter(|word| word.starts_with("time=") || word.starts_with("time<"))
        .filter_map(|word| {
            word.trim_start_matches("time=")
                .trim_start_matches("time<")
                .trim_end_matches("ms")
                .parse::<f64>()
                .ok()
        })
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_time_unix() {
        let output = "64 bytes from 192.168.1.1: icmp_seq=1 ttl=64 time=2.41 ms";
        assert_eq!(parse_ping_time(output), Some(2.41));
    }

    #[test]
    fn test_parse_ping_time_windows() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        assert_eq!(parse_ping_time(output), Some(1.0));
    }

    #[test]
    fn test_parse_ping_time_missing() {
        assert_eq!(parse_ping_time("100% packet loss"), None);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_reply_uses_exit_status() {
        assert!(reply_received("", true));
        assert!(!reply_received("64 bytes from", false));
    }
}
