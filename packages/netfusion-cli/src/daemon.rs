//! Foreground watch mode for continuous network scanning
//!
//! Scans the subnet on a fixed interval and keeps the inventory current.
//! Stops cleanly on SIGTERM or Ctrl+C, including mid-scan.

use anyhow::Result;
use netfusion_core::{ScanError, ScanOrchestrator, ScanResult};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Run scans every `interval_minutes` until a shutdown signal arrives.
pub async fn run_watch(
    orchestrator: &ScanOrchestrator,
    subnet: &str,
    interval_minutes: u64,
    full: bool,
) -> Result<()> {
    tracing::info!(
        "Watching {}: {} scan every {} minutes. Use systemd to run as a background service.",
        subnet,
        if full { "full" } else { "quick" },
        interval_minutes
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // The first tick fires immediately, so the initial scan runs right away
    let mut scan_interval = interval(Duration::from_secs(interval_minutes.max(1) * 60));
    scan_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = scan_interval.tick() => {}
        }

        tokio::select! {
            _ = &mut shutdown => break,
            outcome = run_scan(orchestrator, subnet, full) => match outcome {
                Ok(result) => tracing::info!(
                    "Scan complete: {} devices found in {:.1}s, {} with risky ports",
                    result.devices.len(),
                    result.elapsed_secs,
                    result.threats_detected
                ),
                Err(ScanError::InvalidSubnet(s)) => {
                    anyhow::bail!("Cannot watch invalid subnet '{}'", s);
                }
                Err(e) => tracing::error!("Scan failed: {}", e),
            },
        }
    }

    tracing::info!("Watch stopped");
    Ok(())
}

async fn run_scan(
    orchestrator: &ScanOrchestrator,
    subnet: &str,
    full: bool,
) -> Result<ScanResult, ScanError> {
    tracing::info!("Starting network scan...");
    if full {
        orchestrator.full_scan(subnet).await
    } else {
        orchestrator.quick_scan(subnet).await
    }
}

/// Resolve on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => tracing::info!("Received Ctrl+C, shutting down"),
                }
                return;
            }
            Err(e) => tracing::warn!("Failed to register SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
