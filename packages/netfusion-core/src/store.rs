//! Persistence for device history and scan summaries.
//!
//! Stores the registry, per-subnet observations and the last scan summary in
//! a JSON state file so inventory survives restarts.

use crate::collaborators::DeviceStore;
use crate::scanner::device::{sort_by_ip, DeviceRecord};
use crate::scanner::fusion::canonical_ip;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

const STATE_FILE: &str = "netfusion_state.json";

/// What the last completed scan reported
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub finished_at: DateTime<Utc>,
    pub device_count: usize,
    pub threat_count: usize,
}

/// Observation history for one subnet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkHistory {
    pub observations: u64,
    pub last_device_count: usize,
    pub last_observed: DateTime<Utc>,
}

/// Persisted state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreState {
    pub devices: BTreeMap<String, DeviceRecord>,
    pub networks: BTreeMap<String, NetworkHistory>,
    pub last_scan: Option<ScanSummary>,
}

impl StoreState {
    fn find(&self, device: &DeviceRecord) -> Option<&DeviceRecord> {
        let by_mac = device.mac.as_ref().and_then(|mac| {
            self.devices
                .values()
                .find(|d| d.mac.as_ref().is_some_and(|m| m.eq_ignore_ascii_case(mac)))
        });
        by_mac.or_else(|| self.devices.get(&device.ip))
    }
}

/// Get the default path to the state file
pub fn default_state_path() -> Result<PathBuf> {
    let data_dir = dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .context("Could not find data directory")?;

    Ok(data_dir.join("netfusion").join(STATE_FILE))
}

/// JSON file backed [`DeviceStore`].
///
/// Writes go to memory and are flushed when a scan completes.
#[derive(Debug)]
pub struct JsonDeviceStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JsonDeviceStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path).context("Failed to read state file")?;
            let state: StoreState =
                serde_json::from_str(&content).context("Failed to parse state file")?;
            tracing::info!(
                "Loaded state: {} devices, last scan: {}",
                state.devices.len(),
                state
                    .last_scan
                    .as_ref()
                    .map(|s| s.finished_at.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            state
        } else {
            tracing::debug!("No state file at {:?}, starting empty", path);
            StoreState::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Open the configured state file, or the default one.
    pub fn open_default(state_file: Option<&Path>) -> Result<Self> {
        match state_file {
            Some(path) => Self::open(path),
            None => Self::open(default_state_path()?),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored devices, sorted by IP
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<_> = self.lock().devices.values().cloned().collect();
        sort_by_ip(&mut devices);
        devices
    }

    pub fn last_scan(&self) -> Option<ScanSummary> {
        self.lock().last_scan.clone()
    }

    pub fn network(&self, subnet_prefix: &str) -> Option<NetworkHistory> {
        self.lock().networks.get(subnet_prefix).cloned()
    }

    /// Flag a stored device as known. Returns false if it is not stored.
    pub fn mark_known(&self, ip: &str) -> bool {
        match self.lock().devices.get_mut(canonical_ip(ip)) {
            Some(device) => {
                device.is_known = true;
                true
            }
            None => false,
        }
    }

    /// Save state to disk
    pub fn flush(&self) -> Result<()> {
        let content = {
            let state = self.lock();
            serde_json::to_string_pretty(&*state).context("Failed to serialize state")?
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        std::fs::write(&self.path, content).context("Failed to write state file")?;
        tracing::debug!("Saved state to {:?}", self.path);
        Ok(())
    }

    /// Forget everything and delete the state file.
    pub fn clear(&self) -> Result<()> {
        *self.lock() = StoreState::default();
        if self.path.exists() {
            std::fs::remove_file(&self.path).context("Failed to delete state file")?;
            tracing::info!("Cleared persisted state file");
        }
        Ok(())
    }
}

impl DeviceStore for JsonDeviceStore {
    fn first_seen(&self, device: &DeviceRecord) -> Option<DateTime<Utc>> {
        self.lock().find(device).map(|d| d.first_seen)
    }

    fn is_known(&self, device: &DeviceRecord) -> bool {
        self.lock().find(device).is_some_and(|d| d.is_known)
    }

    fn upsert(&self, device: &DeviceRecord) -> Result<()> {
        let mut state = self.lock();
        let mut record = device.clone();
        if let Some(stored) = state.devices.get(&device.ip) {
            record.first_seen = record.first_seen.min(stored.first_seen);
            record.is_known |= stored.is_known;
        }
        state.devices.insert(record.ip.clone(), record);
        Ok(())
    }

    fn record_network_observation(&self, subnet_prefix: &str, device_count: usize) -> Result<()> {
        let now = Utc::now();
        let mut state = self.lock();
        let history = state
            .networks
            .entry(subnet_prefix.to_string())
            .or_insert(NetworkHistory {
                observations: 0,
                last_device_count: 0,
                last_observed: now,
            });
        history.observations += 1;
        history.last_device_count = device_count;
        history.last_observed = now;
        Ok(())
    }

    fn notify_scan_complete(&self, device_count: usize, threat_count: usize) -> Result<()> {
        self.lock().last_scan = Some(ScanSummary {
            finished_at: Utc::now(),
            device_count,
            threat_count,
        });
        tracing::info!(
            "Scan finished: {} devices, {} with risky ports open",
            device_count,
            threat_count
        );
        self.flush()
    }
}

/// A store that remembers nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl DeviceStore for NullStore {
    fn first_seen(&self, _device: &DeviceRecord) -> Option<DateTime<Utc>> {
        None
    }

    fn is_known(&self, _device: &DeviceRecord) -> bool {
        false
    }

    fn upsert(&self, _device: &DeviceRecord) -> Result<()> {
        Ok(())
    }

    fn record_network_observation(&self, _subnet_prefix: &str, _device_count: usize) -> Result<()> {
        Ok(())
    }

    fn notify_scan_complete(&self, _device_count: usize, _threat_count: usize) -> Result<()> {
        Ok(())
    }
}
