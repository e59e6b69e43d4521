//! Reverse hostname resolution through the system resolver tools

use super::hidden_command;
use crate::collaborators::HostnameResolver;
use async_trait::async_trait;

/// Tries `getent`, then `host`, then `avahi-resolve` (Linux only).
/// On Windows, falls back to NetBIOS names from `nbtstat`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHostnameResolver;

#[async_trait]
impl HostnameResolver for SystemHostnameResolver {
    async fn resolve_hostname(&self, ip: &str) -> Option<String> {
        let ip_owned = ip.to_string();
        tokio::task::spawn_blocking(move || resolve_blocking(&ip_owned))
            .await
            .ok()
            .flatten()
    }
}

fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = hidden_command(program).args(args).output().ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(not(target_os = "windows"))]
fn resolve_blocking(ip: &str) -> Option<String> {
    if let Some(name) = run("getent", &["hosts", ip]).and_then(|out| parse_getent(&out)) {
        return Some(name);
    }
    if let Some(name) = run("host", &[ip]).and_then(|out| parse_host(&out)) {
        return Some(name);
    }
    if cfg!(target_os = "linux") {
        return run("avahi-resolve", &["-a", ip]).and_then(|out| parse_getent(&out));
    }
    None
}

#[cfg(target_os = "windows")]
fn resolve_blocking(ip: &str) -> Option<String> {
    let output = hidden_command("nbtstat").args(["-A", ip]).output().ok()?;
    parse_nbtstat(&String::from_utf8_lossy(&output.stdout))
}

/// `getent hosts` / `avahi-resolve -a`: `<ip> <name> [aliases...]`
pub fn parse_getent(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .nth(1)
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
}

/// `host <ip>`: `1.1.168.192.in-addr.arpa domain name pointer router.lan.`
pub fn parse_host(output: &str) -> Option<String> {
    output
        .split("pointer")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .map(|name| name.trim_end_matches('.').to_string())
        .filter(|name| !name.is_empty())
}

/// First unique `<00>` workstation name in `nbtstat -A` output
pub fn parse_nbtstat(output: &str) -> Option<String> {
    output
        .lines()
        .map(str::trim)
        .find(|line| line.contains("<00>") && line.contains("UNIQUE"))
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_getent() {
        assert_eq!(
            parse_getent("192.168.1.10    nas.lan nas\n").as_deref(),
            Some("nas.lan")
        );
        assert_eq!(parse_getent("192.168.1.10\n"), None);
    }

    #[test]
    fn test_parse_host() {
        let output = "10.1.168.192.in-addr.arpa domain name pointer nas.lan.\n";
        assert_eq!(parse_host(output).as_deref(), Some("nas.lan"));
        assert_eq!(parse_host("Host 10.1.168.192.in-addr.arpa. not found"), None);
    }

    #[test]
    fn test_parse_nbtstat() {
        let output = "\
           NetBIOS Remote Machine Name Table

       Name               Type         Status
    ---------------------------------------------
    DESKTOP-7Q2        <00>  UNIQUE      Registered
    WORKGROUP          <00>  GROUP       Registered
";
        assert_eq!(parse_nbtstat(output).as_deref(), Some("DESKTOP-7Q2"));
    }
}
