//! Scan session state and progress reporting.

use serde::{Deserialize, Serialize};

/// Phases of a scan, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    #[default]
    Idle,
    Pinging,
    MacResolution,
    ServiceDiscovery,
    PortScanning,
    Merging,
    Complete,
}

impl ScanPhase {
    /// Progress window `[start, end]` the phase reports within
    pub fn window(self) -> (f64, f64) {
        match self {
            ScanPhase::Idle => (0.0, 0.0),
            ScanPhase::Pinging => (0.0, 0.20),
            ScanPhase::MacResolution => (0.20, 0.30),
            ScanPhase::ServiceDiscovery => (0.30, 0.40),
            ScanPhase::PortScanning => (0.40, 0.95),
            ScanPhase::Merging => (0.95, 1.0),
            ScanPhase::Complete => (1.0, 1.0),
        }
    }

    /// Progress at `fraction` of the way through this phase
    pub fn progress_at(self, fraction: f64) -> f64 {
        let (start, end) = self.window();
        start + (end - start) * fraction.clamp(0.0, 1.0)
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanPhase::Idle => write!(f, "idle"),
            ScanPhase::Pinging => write!(f, "pinging"),
            ScanPhase::MacResolution => write!(f, "mac resolution"),
            ScanPhase::ServiceDiscovery => write!(f, "service discovery"),
            ScanPhase::PortScanning => write!(f, "port scanning"),
            ScanPhase::Merging => write!(f, "merging"),
            ScanPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Which workflow a session is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    Quick,
    Full,
    Preset,
    Port,
    Deep,
    SingleHost,
    Import,
}

/// Live state of the current (or last) scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub kind: Option<ScanKind>,
    pub phase: ScanPhase,
    /// Fraction in [0, 1], never decreases within a scan
    pub progress: f64,
    pub status: String,
    pub scanned_hosts: usize,
    pub hosts_alive: usize,
    pub threats_detected: usize,
    pub elapsed_secs: f64,
}

impl ScanSession {
    pub fn percent(&self) -> u8 {
        (self.progress * 100.0).round().clamp(0.0, 100.0) as u8
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.phase, ScanPhase::Idle | ScanPhase::Complete)
    }
}

/// Callback type for scan progress updates
pub type ProgressCallback = Box<dyn Fn(&ScanSession) + Send + Sync>;
