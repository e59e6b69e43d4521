//! TCP connect port probing

use crate::collaborators::PortProber;
use crate::scanner::device::PortDescriptor;
use crate::scanner::fusion::canonical_ip;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Reports a port open when a full TCP handshake completes within the
/// timeout. Refused and timed-out ports are omitted.
#[derive(Debug, Clone)]
pub struct TcpConnectProber {
    timeout: Duration,
    parallelism: usize,
}

impl TcpConnectProber {
    pub fn new(timeout: Duration, parallelism: usize) -> Self {
        Self {
            timeout,
            parallelism: parallelism.max(1),
        }
    }
}

#[async_trait]
impl PortProber for TcpConnectProber {
    async fn probe_ports(&self, host: &str, ports: &[u16]) -> Result<Vec<PortDescriptor>> {
        let ip: IpAddr = canonical_ip(host)
            .parse()
            .with_context(|| format!("Not an IP address: {}", host))?;
        let timeout = self.timeout;

        let mut open: Vec<PortDescriptor> = stream::iter(ports.iter().copied())
            .map(|port| async move {
                let addr = SocketAddr::new(ip, port);
                match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                    Ok(Ok(_)) => Some(PortDescriptor::open(port)),
                    _ => None,
                }
            })
            .buffer_unordered(self.parallelism)
            .filter_map(|found| async move { found })
            .collect()
            .await;

        open.sort_by_key(|p| p.port);
        if !open.is_empty() {
            tracing::debug!("{}: {} open ports", ip, open.len());
        }
        Ok(open)
    }
}
