//! Subcommand handlers. Output goes to stdout, diagnostics to the log.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use licmon_core::api::{LicenseMonitor, StartOutcome};
use licmon_core::notify::ChannelKind;
use licmon_core::usage::LicenseSnapshot;

/// How often a standby instance retries the poller lock
const STANDBY_RETRY: Duration = Duration::from_secs(300);

/// Poll until Ctrl-C. Instances that lose the lock race stay on standby
/// and take over once the lock becomes free.
pub async fn run(monitor: &LicenseMonitor) -> Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut retry = tokio::time::interval(STANDBY_RETRY);
    let mut standby_logged = false;

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("Interrupted, shutting down");
                break;
            }
            _ = retry.tick() => match monitor.start_polling() {
                StartOutcome::Running => standby_logged = false,
                StartOutcome::Failed { reason } => {
                    if !standby_logged {
                        info!("Standing by: {}", reason);
                        standby_logged = true;
                    } else {
                        debug!("Still standing by: {}", reason);
                    }
                }
            },
        }
    }

    monitor.shutdown().await;
    Ok(())
}

/// Run one cycle and print the snapshot as JSON
pub async fn fetch(monitor: &LicenseMonitor) -> Result<()> {
    let report = monitor.run_cycle_once().await?;
    println!("{}", serde_json::to_string_pretty(&report.snapshot)?);
    if !report.alerts.is_empty() {
        eprintln!(
            "{} alert(s), {} delivered",
            report.alerts.len(),
            report.alerts_sent()
        );
    }
    Ok(())
}

/// Print stored snapshots, newest first
pub fn history(monitor: &LicenseMonitor, limit: usize) -> Result<()> {
    let snapshots = monitor.history(limit)?;
    if snapshots.is_empty() {
        println!("No snapshots stored");
        return Ok(());
    }
    println!(
        "{:<22} {:>8} {:>8} {:>10} {:>8}",
        "Taken at", "AP used", "AP total", "Available", "Clients"
    );
    for snapshot in &snapshots {
        println!("{}", history_row(snapshot));
    }
    Ok(())
}

fn history_row(snapshot: &LicenseSnapshot) -> String {
    let ap = snapshot.license("AP").unwrap_or_default();
    format!(
        "{:<22} {:>8} {:>8} {:>10} {:>8}",
        snapshot.taken_at().format("%Y-%m-%d %H:%M:%S"),
        ap.used,
        ap.total_installed,
        ap.available(),
        snapshot.connected_clients()
    )
}

/// Print the poller state, latest usage and thresholds
pub fn status(monitor: &LicenseMonitor) -> Result<()> {
    let state = monitor.poller_status();
    println!("Poller:    {} (this process)", state.phase);
    println!("Interval:  {}s", state.interval_secs);
    println!("Lock:      {:?}", monitor.lock_path());

    match monitor.latest_snapshot()? {
        Some(snapshot) => {
            println!(
                "Latest:    {} ({} clients)",
                snapshot.taken_at().format("%Y-%m-%d %H:%M:%S UTC"),
                snapshot.connected_clients()
            );
            println!();
            println!(
                "{:<10} {:>8} {:>8} {:>10} {:>8}",
                "Type", "Used", "Total", "Available", "Usage"
            );
            for item in snapshot.summary() {
                println!(
                    "{:<10} {:>8} {:>8} {:>10} {:>7.2}%",
                    item.license_type,
                    item.used,
                    item.total_installed,
                    item.available,
                    item.usage_percent
                );
            }
        }
        None => println!("Latest:    none"),
    }

    let thresholds = monitor.thresholds();
    println!();
    if thresholds.is_empty() {
        println!("No thresholds configured");
    } else {
        println!("{:<24} {:>10} {:>6} {:>7}", "Entity", "AP above", "Email", "Syslog");
        for (entity, t) in thresholds.iter() {
            println!(
                "{:<24} {:>10} {:>6} {:>7}",
                entity,
                if t.is_enabled() {
                    t.ap_threshold.to_string()
                } else {
                    "off".to_string()
                },
                yes_no(t.notify_email),
                yes_no(t.notify_syslog)
            );
        }
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Send a test alert through one channel
pub async fn test_alert(monitor: &LicenseMonitor, entity: &str, channel: ChannelKind) -> Result<()> {
    monitor.send_test_alert(entity, channel).await?;
    println!("Test alert for {} sent via {}", entity, channel);
    Ok(())
}
