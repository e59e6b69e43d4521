//! ARP table scanning using system commands

use super::hidden_command;
use crate::collaborators::MacResolver;
use crate::scanner::fusion::canonical_ip;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;

/// Resolves MACs from the kernel's ARP cache.
///
/// Only hosts the sweep has recently talked to appear in the cache, so this
/// runs after the liveness pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArpTableResolver;

#[async_trait]
impl MacResolver for ArpTableResolver {
    async fn resolve_macs(&self, ips: &[String]) -> Result<HashMap<String, String>> {
        let table = read_arp_table().await?;
        let resolved: HashMap<String, String> = ips
            .iter()
            .filter_map(|ip| {
                let key = canonical_ip(ip);
                table.get(key).map(|mac| (key.to_string(), mac.clone()))
            })
            .collect();
        tracing::debug!("ARP table resolved {}/{} hosts", resolved.len(), ips.len());
        Ok(resolved)
    }
}

/// Read the system ARP table as IP -> MAC.
pub async fn read_arp_table() -> Result<HashMap<String, String>> {
    tokio::task::spawn_blocking(read_arp_table_blocking)
        .await
        .context("ARP table task failed")?
}

fn read_arp_table_blocking() -> Result<HashMap<String, String>> {
    #[cfg(target_os = "windows")]
    let (args, parse): (&[&str], fn(&str) -> Vec<(String, String)>) = (&["-a"], parse_windows);

    #[cfg(target_os = "linux")]
    let (args, parse): (&[&str], fn(&str) -> Vec<(String, String)>) = (&["-n"], parse_linux);

    #[cfg(target_os = "macos")]
    let (args, parse): (&[&str], fn(&str) -> Vec<(String, String)>) = (&["-a", "-n"], parse_macos);

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        return Ok(HashMap::new());
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    {
        let output = hidden_command("arp")
            .args(args)
            .output()
            .context("Failed to run arp")?;
        let output_str = String::from_utf8_lossy(&output.stdout);
        Ok(parse(&output_str).into_iter().collect())
    }
}

/// Normalize to upper-case, colon-separated, zero-padded octets.
///
/// Rejects anything that is not six octets, plus the all-zero and broadcast
/// addresses.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let octets: Vec<&str> = raw.split([':', '-']).collect();
    if octets.len() != 6 {
        return None;
    }

    let mut bytes = [0u8; 6];
    for (byte, octet) in bytes.iter_mut().zip(&octets) {
        if octet.is_empty() || octet.len() > 2 {
            return None;
        }
        *byte = u8::from_str_radix(octet, 16).ok()?;
    }

    if bytes == [0; 6] || bytes == [0xff; 6] {
        return None;
    }

    Some(
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

fn usable_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => !v4.is_multicast() && !v4.is_broadcast() && !ip.ends_with(".255"),
        Ok(IpAddr::V6(_)) => true,
        Err(_) => false,
    }
}

/// `arp -n`: `Address HWtype HWaddress Flags Mask Iface`
pub fn parse_linux(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let (ip, mac) = (parts.first()?, parts.get(2)?);
            if !usable_ip(ip) {
                return None;
            }
            Some((ip.to_string(), normalize_mac(mac)?))
        })
        .collect()
}

/// `arp -a -n`: `? (192.168.1.1) at a:b:c:d:e:f on en0 ifscope [ethernet]`
pub fn parse_macos(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let ip_start = line.find('(')?;
            let ip_end = line.find(')')?;
            let ip = line.get(ip_start + 1..ip_end)?;
            if !usable_ip(ip) {
                return None;
            }
            let at_pos = line.find(" at ")?;
            let mac = line[at_pos + 4..].split_whitespace().next()?;
            Some((ip.to_string(), normalize_mac(mac)?))
        })
        .collect()
}

/// `arp -a`: `  192.168.1.1           aa-bb-cc-dd-ee-ff     dynamic`
pub fn parse_windows(output: &str) -> Vec<(String, String)> {
    let mut by_ip: HashMap<String, String> = HashMap::new();
    let mut order = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let (Some(ip), Some(mac)) = (parts.first(), parts.get(1)) else {
            continue;
        };
        if !usable_ip(ip) || by_ip.contains_key(*ip) {
            continue;
        }
        if let Some(mac) = normalize_mac(mac) {
            order.push(ip.to_string());
            by_ip.insert(ip.to_string(), mac);
        }
    }

    order
        .into_iter()
        .filter_map(|ip| by_ip.remove(&ip).map(|mac| (ip, mac)))
        .collect()
}
