//! Netfusion CLI - network discovery and device inventory from the terminal
//!
//! This binary drives the netfusion engine:
//! - Quick liveness sweeps and full multi-phase scans of the local subnet
//! - Port and deep rescans of known devices
//! - Importing host lists discovered by other tools
//! - Periodic scanning in the foreground (for systemd integration)

mod daemon;

use anyhow::{Context, Result};
use netfusion_core::config::{self, LoadedConfig};
use netfusion_core::store::JsonDeviceStore;
use netfusion_core::system::detect_network;
use netfusion_core::{Collaborators, DeviceRecord, ScanOrchestrator, ScanResult, ScanSession};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::{Arc, Mutex};

#[derive(Parser)]
#[command(name = "netfusion")]
#[command(author = "Stratiform LLC")]
#[command(version)]
#[command(about = "Discover, fingerprint and track the devices on your network")]
#[command(long_about = "
Netfusion sweeps the local network, resolves hardware addresses and
hostnames, scans ports and classifies what it finds. Results are merged
into a persistent inventory, so repeated scans track devices over time.

Quick start:
  1. Find what is online:   netfusion quick
  2. Fingerprint it:        netfusion full
  3. Keep watching:         netfusion watch --interval 15
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Liveness sweep only: which hosts are up
    Quick {
        /// Subnet as CIDR or /24 prefix (default: detected)
        subnet: Option<String>,
    },

    /// Full scan: liveness, MAC, hostnames, services and ports
    Full {
        /// Subnet as CIDR or /24 prefix (default: detected)
        subnet: Option<String>,

        /// Scan a named port list from the config file instead of the standard one
        #[arg(short, long)]
        preset: Option<String>,
    },

    /// Rescan the standard ports of every known device
    Ports,

    /// Rescan every TCP port of every known device
    Deep,

    /// Scan one address
    Host {
        /// IP address to scan
        ip: String,
    },

    /// Merge addresses found by another tool into the inventory
    Import {
        /// IP addresses that are currently online
        #[arg(required = true)]
        ips: Vec<String>,
    },

    /// Scan periodically until interrupted
    #[command(alias = "daemon")]
    Watch {
        /// Subnet as CIDR or /24 prefix (default: detected)
        subnet: Option<String>,

        /// Scan interval in minutes
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Run full scans instead of quick sweeps
        #[arg(long)]
        full: bool,
    },

    /// List the stored device inventory
    Devices,

    /// Mark a stored device as known so it is trusted in future scans
    Known {
        /// IP address of the stored device
        ip: String,
    },

    /// Show configuration paths and settings
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("netfusion={},netfusion_core={}", log_level, log_level).into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Quick { subnet } => {
            let engine = Engine::open(&cli)?;
            let subnet = resolve_subnet(&cli, subnet.clone()).await?;
            let result = engine.orchestrator.quick_scan(&subnet).await?;
            print_result(&cli, &result)
        }
        Commands::Full { subnet, preset } => {
            let engine = Engine::open(&cli)?;
            let subnet = resolve_subnet(&cli, subnet.clone()).await?;
            let result = match preset {
                Some(name) => engine.orchestrator.preset_scan(&subnet, name).await?,
                None => engine.orchestrator.full_scan(&subnet).await?,
            };
            print_result(&cli, &result)
        }
        Commands::Ports => {
            let engine = Engine::open(&cli)?;
            require_inventory(&engine).await?;
            let result = engine.orchestrator.port_scan().await?;
            print_result(&cli, &result)
        }
        Commands::Deep => {
            let engine = Engine::open(&cli)?;
            require_inventory(&engine).await?;
            let result = engine.orchestrator.deep_scan().await?;
            print_result(&cli, &result)
        }
        Commands::Host { ip } => {
            let engine = Engine::open(&cli)?;
            let result = engine.orchestrator.single_host_scan(ip).await?;
            print_result(&cli, &result)
        }
        Commands::Import { ips } => {
            let engine = Engine::open(&cli)?;
            let result = engine.orchestrator.import_incremental(ips).await?;
            print_result(&cli, &result)
        }
        Commands::Watch { subnet, interval, full } => {
            let engine = Engine::open_quiet()?;
            let subnet = resolve_subnet(&cli, subnet.clone()).await?;
            daemon::run_watch(&engine.orchestrator, &subnet, *interval, *full).await
        }
        Commands::Devices => cmd_devices(&cli),
        Commands::Known { ip } => cmd_known(&cli, ip),
        Commands::Config => cmd_config(&cli),
    }
}

/// Orchestrator wired to the system collaborators and the state file
pub struct Engine {
    pub orchestrator: ScanOrchestrator,
}

impl Engine {
    fn open(cli: &Cli) -> Result<Self> {
        let engine = Self::open_quiet()?;
        let orchestrator = match cli.format {
            OutputFormat::Text => engine.orchestrator.on_progress(progress_printer()),
            OutputFormat::Json => engine.orchestrator,
        };
        Ok(Self { orchestrator })
    }

    fn open_quiet() -> Result<Self> {
        let LoadedConfig { config, source } = config::load_scan_config();
        tracing::debug!("Using scan configuration from {}", source);

        let store = Arc::new(JsonDeviceStore::open_default(config.state_file.as_deref())?);
        let seed = store.devices();
        let collaborators = Collaborators::system(&config, store);
        let orchestrator = ScanOrchestrator::new(config, collaborators).with_registry(seed);
        Ok(Self { orchestrator })
    }
}

/// Print a status line whenever the scan status changes.
fn progress_printer() -> Box<dyn Fn(&ScanSession) + Send + Sync> {
    let last = Mutex::new(String::new());
    Box::new(move |session: &ScanSession| {
        let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
        if *last != session.status {
            println!("  [{:>3}%] {}", session.percent(), session.status);
            *last = session.status.clone();
        }
    })
}

async fn resolve_subnet(cli: &Cli, subnet: Option<String>) -> Result<String> {
    if let Some(subnet) = subnet {
        return Ok(subnet);
    }

    let info = detect_network().await.context("Failed to detect local network")?;
    if let OutputFormat::Text = cli.format {
        println!(
            "Scanning {} on {} (gateway {})",
            info.subnet,
            if info.interface.is_empty() { "-" } else { info.interface.as_str() },
            info.gateway_ip.as_deref().unwrap_or("-")
        );
    }
    Ok(info.subnet)
}

async fn require_inventory(engine: &Engine) -> Result<()> {
    if engine.orchestrator.devices().await.is_empty() {
        anyhow::bail!("No known devices yet. Run 'netfusion quick' or 'netfusion full' first.");
    }
    Ok(())
}

fn device_row(device: &DeviceRecord) -> String {
    let hostname = device
        .display_name
        .as_deref()
        .or(device.hostname.as_deref())
        .unwrap_or("-");
    let ports = device
        .port_numbers()
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut row = format!(
        "  {:15} {:<8} {:<8} {}",
        device.ip,
        if device.is_online { "online" } else { "offline" },
        device.device_type.to_string(),
        hostname
    );
    if let Some(vendor) = &device.manufacturer {
        row.push_str(&format!(" ({})", vendor));
    }
    if !ports.is_empty() {
        row.push_str(&format!("  [{}]", ports));
    }
    row
}

fn print_result(cli: &Cli, result: &ScanResult) -> Result<()> {
    match cli.format {
        OutputFormat::Text => {
            println!();
            println!(
                "Found {} devices in {:.1}s:",
                result.devices.len(),
                result.elapsed_secs
            );
            println!();
            for device in &result.devices {
                println!("{}", device_row(device));
            }
            if result.threats_detected > 0 {
                println!();
                println!(
                    "{} device(s) expose risky ports (telnet, SMB, RDP, VNC...)",
                    result.threats_detected
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}

fn cmd_devices(cli: &Cli) -> Result<()> {
    let LoadedConfig { config, .. } = config::load_scan_config();
    let store = JsonDeviceStore::open_default(config.state_file.as_deref())?;
    let devices = store.devices();
    let last_scan = store.last_scan();

    match cli.format {
        OutputFormat::Text => {
            match &last_scan {
                Some(scan) => println!(
                    "Last scan: {} ({} devices, {} with risky ports)",
                    scan.finished_at.to_rfc3339(),
                    scan.device_count,
                    scan.threat_count
                ),
                None => println!("Last scan: never"),
            }
            println!();
            if devices.is_empty() {
                println!("No devices stored yet.");
            }
            for device in &devices {
                println!("{}", device_row(device));
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "state_file": store.path().display().to_string(),
                    "last_scan": last_scan,
                    "devices": devices,
                })
            );
        }
    }

    Ok(())
}

fn cmd_known(cli: &Cli, ip: &str) -> Result<()> {
    let LoadedConfig { config, .. } = config::load_scan_config();
    let store = JsonDeviceStore::open_default(config.state_file.as_deref())?;

    if !store.mark_known(ip) {
        anyhow::bail!("No stored device at {}. Run a scan first.", ip);
    }
    store.flush()?;

    match cli.format {
        OutputFormat::Text => println!("Marked {} as known", ip),
        OutputFormat::Json => println!("{}", serde_json::json!({ "ip": ip, "known": true })),
    }
    Ok(())
}

fn cmd_config(cli: &Cli) -> Result<()> {
    let loaded = config::load_scan_config();
    let config_path = config::get_config_file_path_string();
    let state_path = match &loaded.config.state_file {
        Some(path) => path.display().to_string(),
        None => netfusion_core::store::default_state_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| "(unknown)".to_string()),
    };

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Loaded from:      {}", loaded.source);
            println!("State file:       {}", state_path);
            println!("Concurrency:      {} hosts", loaded.config.concurrency);
            println!("Probe timeout:    {}ms", loaded.config.probe_timeout_ms);
            println!("Risky ports:      {:?}", loaded.config.risky_ports);
            let presets: Vec<&str> = loaded.config.presets.keys().map(String::as_str).collect();
            println!(
                "Presets:          {}",
                if presets.is_empty() { "-".to_string() } else { presets.join(", ") }
            );
            println!();
            println!("Environment variables:");
            println!("  NETFUSION_CONCURRENCY - Override hosts scanned at once");
            println!("  NETFUSION_STATE_FILE  - Override the state file location");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": loaded.source.to_string(),
                    "state_file": state_path,
                    "scan": loaded.config,
                })
            );
        }
    }

    Ok(())
}
