//! Errors surfaced to callers of the scan engine.
//!
//! Only request validation and concurrency conflicts are errors. Probe
//! failures inside a running scan degrade to missing signals instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Another scan holds the orchestrator
    #[error("a scan is already in progress")]
    ScanInProgress,

    #[error("invalid subnet '{0}': expected CIDR (192.168.1.0/24) or /24 prefix (192.168.1)")]
    InvalidSubnet(String),

    #[error("invalid IP address '{0}'")]
    InvalidAddress(String),

    #[error("unknown scan preset '{0}'")]
    UnknownPreset(String),

    #[error("configuration error: {0}")]
    Config(String),
}
