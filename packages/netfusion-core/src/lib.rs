//! Netfusion Core Library
//!
//! Network discovery and device fusion engine:
//! - Multi-phase scans (liveness sweep, MAC and hostname resolution,
//!   service discovery, bounded-concurrency port scanning)
//! - Fusion of raw observations into one record per host
//! - Device classification from vendor, hostname, ports and service metadata
//! - Incremental reconciliation against a persistent device registry
//!
//! Discovery sources are pluggable through the traits in [`collaborators`];
//! [`system`] provides implementations backed by the host's network tools.
//!
//! # Example
//!
//! ```no_run
//! use netfusion_core::{config, store, Collaborators, ScanOrchestrator};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let loaded = config::load_scan_config();
//!     let store = Arc::new(store::JsonDeviceStore::open_default(
//!         loaded.config.state_file.as_deref(),
//!     )?);
//!     let seed = store.devices();
//!
//!     let collaborators = Collaborators::system(&loaded.config, store);
//!     let orchestrator = ScanOrchestrator::new(loaded.config, collaborators).with_registry(seed);
//!
//!     let result = orchestrator.full_scan("192.168.1.0/24").await?;
//!     for device in &result.devices {
//!         println!("{} {}", device.ip, device.device_type);
//!     }
//!     Ok(())
//! }
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod scanner;
pub mod store;
pub mod system;

pub use error::ScanError;
pub use scanner::{
    Collaborators, DeviceRecord, DeviceType, ScanKind, ScanOrchestrator, ScanPhase, ScanResult,
    ScanSession, Subnet,
};
