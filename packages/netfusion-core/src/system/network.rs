//! Local network detection

use super::hidden_command;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Subnet assumed when the platform tools give nothing usable
pub const FALLBACK_SUBNET: &str = "192.168.1.0/24";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub interface: String,
    /// CIDR of the attached network
    pub subnet: String,
    pub gateway_ip: Option<String>,
    pub local_ip: Option<String>,
}

/// Detect the interface, subnet and gateway of the default route.
pub async fn detect_network() -> Result<NetworkInfo> {
    tokio::task::spawn_blocking(detect_blocking)
        .await
        .context("Network detection task failed")?
}

#[cfg(target_os = "linux")]
fn detect_blocking() -> Result<NetworkInfo> {
    let route_output = hidden_command("ip")
        .args(["route", "show", "default"])
        .output()
        .context("Failed to run ip route command")?;
    let (gateway_ip, interface) = parse_linux_route(&String::from_utf8_lossy(&route_output.stdout));
    let interface = interface.unwrap_or_else(|| "eth0".to_string());

    let addr_output = hidden_command("ip")
        .args(["addr", "show", &interface])
        .output()
        .context("Failed to run ip addr command")?;
    let addr = parse_linux_inet(&String::from_utf8_lossy(&addr_output.stdout));

    Ok(build_info(interface, gateway_ip, addr))
}

#[cfg(target_os = "macos")]
fn detect_blocking() -> Result<NetworkInfo> {
    let route_output = hidden_command("route")
        .args(["-n", "get", "default"])
        .output()
        .context("Failed to run route command")?;
    let (gateway_ip, interface) = parse_macos_route(&String::from_utf8_lossy(&route_output.stdout));
    let interface = interface.unwrap_or_else(|| "en0".to_string());

    let ifconfig_output = hidden_command("ifconfig")
        .arg(&interface)
        .output()
        .context("Failed to run ifconfig command")?;
    let addr = parse_macos_inet(&String::from_utf8_lossy(&ifconfig_output.stdout));

    Ok(build_info(interface, gateway_ip, addr))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn detect_blocking() -> Result<NetworkInfo> {
    tracing::warn!("Network detection unsupported here, assuming {}", FALLBACK_SUBNET);
    Ok(build_info(String::new(), None, None))
}

fn build_info(
    interface: String,
    gateway_ip: Option<String>,
    addr: Option<(Ipv4Addr, String)>,
) -> NetworkInfo {
    match addr {
        Some((local_ip, subnet)) => NetworkInfo {
            interface,
            subnet,
            gateway_ip,
            local_ip: Some(local_ip.to_string()),
        },
        None => NetworkInfo {
            interface,
            subnet: FALLBACK_SUBNET.to_string(),
            gateway_ip,
            local_ip: None,
        },
    }
}

/// `default via 192.168.1.1 dev wlp2s0 proto dhcp metric 600`
pub fn parse_linux_route(output: &str) -> (Option<String>, Option<String>) {
    let after = |keyword: &str| {
        output
            .split_whitespace()
            .skip_while(|&s| s != keyword)
            .nth(1)
            .map(str::to_string)
    };
    (after("via"), after("dev"))
}

/// First non-loopback `inet a.b.c.d/nn` line of `ip addr show`
pub fn parse_linux_inet(output: &str) -> Option<(Ipv4Addr, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("inet ") && !line.contains("127.0.0.1"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|cidr| cidr.parse::<ipnetwork::Ipv4Network>().ok())
        .map(|net| (net.ip(), format!("{}/{}", net.network(), net.prefix())))
        .next()
}

/// `route -n get default`: `gateway: 192.168.1.1` / `interface: en0`
pub fn parse_macos_route(output: &str) -> (Option<String>, Option<String>) {
    let field = |name: &str| {
        output
            .lines()
            .map(str::trim)
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split(':').nth(1))
            .map(|s| s.trim().to_string())
    };
    (field("gateway:"), field("interface:"))
}

/// `ifconfig en0`: `inet 192.168.1.23 netmask 0xffffff00 broadcast ...`
pub fn parse_macos_inet(output: &str) -> Option<(Ipv4Addr, String)> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("inet ") && !line.contains("127.0.0.1"))
        .find_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            let ip: Ipv4Addr = parts.get(1)?.parse().ok()?;
            let mask = u32::from_str_radix(parts.get(3)?.trim_start_matches("0x"), 16).ok()?;
            let network = Ipv4Addr::from(u32::from(ip) & mask);
            Some((ip, format!("{}/{}", network, mask.count_ones())))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_route() {
        let (gateway, dev) =
            parse_linux_route("default via 192.168.1.1 dev wlp2s0 proto dhcp metric 600\n");
        assert_eq!(gateway.as_deref(), Some("192.168.1.1"));
        assert_eq!(dev.as_deref(), Some("wlp2s0"));
        assert_eq!(parse_linux_route(""), (None, None));
    }

    #[test]
    fn test_parse_linux_inet() {
        let output = "\
2: wlp2s0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP
    link/ether 3c:a9:f4:00:11:22 brd ff:ff:ff:ff:ff:ff
    inet 192.168.1.23/24 brd 192.168.1.255 scope global dynamic wlp2s0
    inet6 fe80::1/64 scope link
";
        let (ip, subnet) = parse_linux_inet(output).unwrap();
        assert_eq!(ip, Ipv4Addr::new(192, 168, 1, 23));
        assert_eq!(subnet, "192.168.1.0/24");
    }

    #[test]
    fn test_parse_macos() {
        let route = "   route to: default\ndestination: default\n    gateway: 10.0.0.1\n  interface: en0\n";
        let (gateway, interface) = parse_macos_route(route);
        assert_eq!(gateway.as_deref(), Some("10.0.0.1"));
        assert_eq!(interface.as_deref(), Some("en0"));

        let ifconfig = "en0: flags=8863<UP>\n\tinet 10.0.0.42 netmask 0xfffffc00 broadcast 10.0.3.255\n";
        let (ip, subnet) = parse_macos_inet(ifconfig).unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 42));
        assert_eq!(subnet, "10.0.0.0/22");
    }

    #[test]
    fn test_fallback_subnet() {
        let info = build_info("eth0".to_string(), None, None);
        assert_eq!(info.subnet, FALLBACK_SUBNET);
        assert!(info.local_ip.is_none());
    }
}
