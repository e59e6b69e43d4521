//! Collaborators backed by the host operating system.
//!
//! Discovery shells out to the platform tools (`ping`, `arp`, `getent`,
//! `ip`/`route`) and probes ports with plain TCP connects, so no elevated
//! privileges are needed.

pub mod arp;
pub mod dns;
pub mod network;
pub mod ping;
pub mod tcp;

pub use arp::ArpTableResolver;
pub use dns::SystemHostnameResolver;
pub use network::{detect_network, NetworkInfo};
pub use ping::SystemPingProber;
pub use tcp::TcpConnectProber;

use crate::collaborators::{DeviceStore, NoServiceDiscovery};
use crate::config::ScanConfig;
use crate::scanner::Collaborators;
use std::process::Command;
use std::sync::Arc;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub(crate) fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

impl Collaborators {
    /// Wire up the operating-system collaborators with the given store.
    ///
    /// Zero-configuration service discovery has no system backend and is
    /// reported as unavailable.
    pub fn system(config: &ScanConfig, store: Arc<dyn DeviceStore>) -> Self {
        Self {
            liveness: Arc::new(SystemPingProber::new()),
            mac_resolver: Arc::new(ArpTableResolver),
            service_discovery: Arc::new(NoServiceDiscovery),
            port_prober: Arc::new(TcpConnectProber::new(
                config.probe_timeout(),
                config.port_parallelism,
            )),
            hostname_resolver: Some(Arc::new(SystemHostnameResolver)),
            store,
        }
    }
}
