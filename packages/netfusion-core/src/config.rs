use crate::error::ScanError;
use crate::scanner::oui::OuiLookup;
use crate::scanner::ports::{PortList, DEFAULT_CONCURRENCY, STANDARD_PORTS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the port scan concurrency
const ENV_CONCURRENCY: &str = "NETFUSION_CONCURRENCY";

/// Environment variable overriding the state file location
const ENV_STATE_FILE: &str = "NETFUSION_STATE_FILE";

/// Ports whose exposure counts as a threat
const DEFAULT_RISKY_PORTS: &[u16] = &[21, 23, 135, 139, 445, 3389, 5900];

/// Configuration file structure
#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    scan: Option<ScanConfig>,
}

/// Runtime scan configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Hosts port-scanned at once
    pub concurrency: usize,
    /// TCP connect timeout per port
    pub probe_timeout_ms: u64,
    /// Ports probed at once on a single host
    pub port_parallelism: usize,
    pub hostname_timeout_ms: u64,
    /// Replaces the built-in standard port list when set
    pub standard_ports: Vec<u16>,
    pub risky_ports: Vec<u16>,
    /// Named custom port lists for preset scans
    pub presets: BTreeMap<String, Vec<u16>>,
    /// TOML file of `"AA:BB:CC" = "Vendor"` OUI overrides
    pub oui_overrides: Option<PathBuf>,
    pub state_file: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            probe_timeout_ms: 800,
            port_parallelism: 128,
            hostname_timeout_ms: 2000,
            standard_ports: STANDARD_PORTS.to_vec(),
            risky_ports: DEFAULT_RISKY_PORTS.to_vec(),
            presets: BTreeMap::new(),
            oui_overrides: None,
            state_file: None,
        }
    }
}

impl ScanConfig {
    /// Parse the `[scan]` table of a config file.
    pub fn from_toml_str(content: &str) -> Result<Self, ScanError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ScanError::Config(e.to_string()))?;
        Ok(file.scan.unwrap_or_default().normalized())
    }

    fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.port_parallelism = self.port_parallelism.max(1);
        if self.standard_ports.is_empty() {
            self.standard_ports = STANDARD_PORTS.to_vec();
        }
        self
    }

    pub fn standard_port_list(&self) -> PortList {
        PortList::Standard(self.standard_ports.clone())
    }

    pub fn preset(&self, name: &str) -> Result<PortList, ScanError> {
        self.presets
            .get(name)
            .filter(|ports| !ports.is_empty())
            .map(|ports| PortList::Custom(ports.clone()))
            .ok_or_else(|| ScanError::UnknownPreset(name.to_string()))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn hostname_timeout(&self) -> Duration {
        Duration::from_millis(self.hostname_timeout_ms)
    }

    /// Build the OUI lookup, falling back to the bundled database alone
    /// when the override file cannot be loaded.
    pub fn oui_lookup(&self) -> OuiLookup {
        match &self.oui_overrides {
            Some(path) => match OuiLookup::from_overrides_file(path) {
                Ok(lookup) => lookup,
                Err(e) => {
                    tracing::warn!("Ignoring OUI overrides: {:#}", e);
                    OuiLookup::new()
                }
            },
            None => OuiLookup::new(),
        }
    }
}

/// Scan configuration with where it came from
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ScanConfig,
    pub source: ConfigSource,
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Environment variable applied (on top of file or defaults)
    Environment,
    /// Loaded from config file
    ConfigFile,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::ConfigFile => write!(f, "config file"),
        }
    }
}

/// Get the path to the configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("netfusion").join("config.toml"))
}

/// Load configuration from the config file
fn load_config_file() -> Option<ScanConfig> {
    let path = get_config_file_path()?;

    if !path.exists() {
        return None;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match ScanConfig::from_toml_str(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load scan configuration with priority:
/// 1. Environment variables (NETFUSION_CONCURRENCY, NETFUSION_STATE_FILE)
/// 2. Config file (~/.config/netfusion/config.toml)
/// 3. Default values
pub fn load_scan_config() -> LoadedConfig {
    let (config, source) = match load_config_file() {
        Some(config) => (config, ConfigSource::ConfigFile),
        None => (ScanConfig::default(), ConfigSource::Default),
    };

    apply_env_overrides(
        config,
        source,
        std::env::var(ENV_CONCURRENCY).ok(),
        std::env::var(ENV_STATE_FILE).ok(),
    )
}

fn apply_env_overrides(
    mut config: ScanConfig,
    mut source: ConfigSource,
    concurrency: Option<String>,
    state_file: Option<String>,
) -> LoadedConfig {
    if let Some(value) = concurrency {
        match value.trim().parse::<usize>() {
            Ok(n) if n > 0 => {
                tracing::info!("Using scan concurrency from environment variable: {}", n);
                config.concurrency = n;
                source = ConfigSource::Environment;
            }
            _ => tracing::warn!("Ignoring invalid {}='{}'", ENV_CONCURRENCY, value),
        }
    }

    if let Some(value) = state_file {
        let value = value.trim();
        if !value.is_empty() {
            config.state_file = Some(PathBuf::from(value));
            source = ConfigSource::Environment;
        }
    }

    LoadedConfig { config, source }
}

/// Get the config file path as a string (for display purposes)
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(unknown)".to_string())
}

/// Generate an example configuration file content
pub fn generate_example_config() -> String {
    r#"# Netfusion Configuration
# Place this file at ~/.config/netfusion/config.toml

[scan]
# Hosts port-scanned at the same time
concurrency = 10

# TCP connect timeout per port, in milliseconds
probe_timeout_ms = 800

# Reverse DNS timeout per host, in milliseconds
hostname_timeout_ms = 2000

# Open ports that count as a threat
risky_ports = [21, 23, 135, 139, 445, 3389, 5900]

# Optional OUI vendor overrides ("AA:BB:CC" = "Vendor" per line)
# oui_overrides = "/etc/netfusion/oui-overrides.toml"

# Named port lists for `netfusion full --preset <name>`
[scan.presets]
web = [80, 443, 8000, 8080, 8443]
media = [554, 1935, 3689, 7000, 8554]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = ScanConfig::from_toml_str(&generate_example_config()).unwrap();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.presets["web"], vec![80, 443, 8000, 8080, 8443]);
        assert_eq!(config.standard_ports, STANDARD_PORTS.to_vec());
    }

    #[test]
    fn test_missing_scan_table_is_default() {
        assert_eq!(ScanConfig::from_toml_str("").unwrap(), ScanConfig::default());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            ScanConfig::from_toml_str("[scan]\nconcurrency = \"many\""),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_zero_concurrency_normalized() {
        let config = ScanConfig::from_toml_str("[scan]\nconcurrency = 0").unwrap();
        assert_eq!(config.concurrency, 1);
    }

    #[test]
    fn test_preset_lookup() {
        let mut config = ScanConfig::default();
        config.presets.insert("web".to_string(), vec![443, 80]);
        config.presets.insert("empty".to_string(), vec![]);
        assert_eq!(config.preset("web").unwrap().ports(), vec![80, 443]);
        assert!(matches!(config.preset("empty"), Err(ScanError::UnknownPreset(_))));
        assert!(matches!(config.preset("nope"), Err(ScanError::UnknownPreset(_))));
    }

    #[test]
    fn test_env_overrides() {
        let loaded = apply_env_overrides(
            ScanConfig::default(),
            ConfigSource::Default,
            Some("32".to_string()),
            None,
        );
        assert_eq!(loaded.config.concurrency, 32);
        assert_eq!(loaded.source, ConfigSource::Environment);

        let loaded = apply_env_overrides(
            ScanConfig::default(),
            ConfigSource::ConfigFile,
            Some("zero".to_string()),
            Some("  ".to_string()),
        );
        assert_eq!(loaded.config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(loaded.source, ConfigSource::ConfigFile);
    }
}
