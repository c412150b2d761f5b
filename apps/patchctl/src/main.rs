use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use inventory_core::{
    config::DEFAULT_SETTINGS_FILE, load_settings_from, CommandOutcome, DashboardStats,
    InventoryClient, InventoryCommand, InventoryEvent,
};
use shared::{
    domain::{PatchId, PatchStatus, ServerId, Severity},
    protocol::{Patch, Server},
};
use tokio::{sync::broadcast::error::RecvError, time::MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "patchctl", about = "Inspect server patch inventory and apply patches")]
struct Cli {
    /// Base URL of the inventory authority, e.g. http://127.0.0.1:8000/api
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List known servers.
    Servers,
    /// List the patches of one server.
    Patches { server_id: i64 },
    /// Apply one patch and wait for the outcome.
    Apply { server_id: i64, patch_id: i64 },
    /// Refresh everything and print dashboard statistics.
    Stats {
        /// Limit the statistics to one server.
        #[arg(long)]
        server: Option<i64>,
    },
    /// Keep refreshing and print inventory changes until interrupted.
    Watch {
        /// Seconds between refreshes; defaults to the configured interval.
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let mut settings = load_settings_from(&config_path)?;
    if let Some(server_url) = &cli.server_url {
        settings.server_url = server_url.clone();
        settings.validate()?;
    }
    info!(server_url = %settings.server_url, "patchctl: using inventory authority");
    let client = InventoryClient::from_settings(&settings)?;

    match cli.command {
        Command::Servers => {
            let servers =
                expect_servers(client.dispatch(InventoryCommand::RequestServers).await?)?;
            print_servers(&servers, cli.json)?;
        }
        Command::Patches { server_id } => {
            let patches = expect_patches(
                client
                    .dispatch(InventoryCommand::RequestPatches {
                        server_id: ServerId(server_id),
                    })
                    .await?,
            )?;
            print_patches(&patches, cli.json)?;
        }
        Command::Apply {
            server_id,
            patch_id,
        } => {
            let patch = apply(&client, ServerId(server_id), PatchId(patch_id)).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&patch)?);
            } else {
                println!(
                    "patch {} ({}) on server {}: {} now at {}",
                    patch.id,
                    patch.package_name,
                    patch.server_id,
                    patch.status,
                    patch.current_version
                );
            }
        }
        Command::Stats { server } => {
            if let Err(err) = client.dispatch(InventoryCommand::RefreshAll).await {
                warn!(error = %err, "patchctl: refresh incomplete; statistics may be partial");
            }
            let stats = match server {
                Some(server_id) => client.server_stats(ServerId(server_id)).await,
                None => client.stats().await,
            };
            print_stats(&stats, cli.json)?;
        }
        Command::Watch { interval } => {
            let interval = interval
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .or_else(|| settings.refresh_interval())
                .unwrap_or(DEFAULT_WATCH_INTERVAL);
            watch(&client, interval, cli.json).await?;
        }
    }

    Ok(())
}

/// Walks the same path an operator takes in a dashboard: load the server,
/// select it, load its patches, select the patch, then apply.
async fn apply(
    client: &Arc<InventoryClient>,
    server_id: ServerId,
    patch_id: PatchId,
) -> Result<Patch> {
    client.dispatch(InventoryCommand::RequestServers).await?;
    client
        .dispatch(InventoryCommand::SelectServer { server_id })
        .await?;
    client
        .dispatch(InventoryCommand::RequestPatches { server_id })
        .await?;
    client
        .dispatch(InventoryCommand::SelectPatch { patch_id })
        .await?;
    match client
        .dispatch(InventoryCommand::ApplyPatch { patch_id })
        .await?
    {
        CommandOutcome::Patch(patch) => Ok(patch),
        other => Err(anyhow!("unexpected outcome for apply: {other:?}")),
    }
}

async fn watch(client: &Arc<InventoryClient>, interval: Duration, json: bool) -> Result<()> {
    let mut events = client.subscribe_events();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "patchctl: watching inventory");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("patchctl: interrupted; stopping watch");
                return Ok(());
            }
            _ = ticker.tick() => {
                if let Err(err) = client.dispatch(InventoryCommand::RefreshAll).await {
                    warn!(error = %err, "patchctl: refresh failed");
                }
                let stats = client.stats().await;
                print_stats(&stats, json)?;
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "patchctl: event stream lagged");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn expect_servers(outcome: CommandOutcome) -> Result<Vec<Server>> {
    match outcome {
        CommandOutcome::Servers(servers) => Ok(servers),
        other => Err(anyhow!("unexpected outcome for servers: {other:?}")),
    }
}

fn expect_patches(outcome: CommandOutcome) -> Result<Vec<Patch>> {
    match outcome {
        CommandOutcome::Patches(patches) => Ok(patches),
        other => Err(anyhow!("unexpected outcome for patches: {other:?}")),
    }
}

fn print_servers(servers: &[Server], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(servers)?);
        return Ok(());
    }
    if servers.is_empty() {
        println!("no servers");
    }
    for server in servers {
        println!(
            "{:>6}  {:<24} {:<15} {:<11} {:<20} {}",
            server.id.0,
            server.name,
            server.ip_address,
            server.status,
            server.os_version,
            server.last_checked.to_rfc3339()
        );
    }
    Ok(())
}

fn print_patches(patches: &[Patch], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(patches)?);
        return Ok(());
    }
    if patches.is_empty() {
        println!("no patches");
    }
    for patch in patches {
        println!(
            "{:>6}  {:<28} {:>12} -> {:<12} {:<8} {}",
            patch.id.0,
            patch.package_name,
            patch.current_version,
            patch.available_version,
            patch.severity,
            patch.status
        );
    }
    Ok(())
}

fn print_stats(stats: &DashboardStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!(
        "servers: {} ({} online, {} offline, {} maintenance, {} compliant), {:.0}% online",
        stats.server_count,
        stats.online_server_count,
        stats.offline_server_count,
        stats.maintenance_server_count,
        stats.compliant_server_count,
        stats.online_ratio()
    );
    println!("patches: {}", stats.patch_count);
    for severity in Severity::ALL {
        println!(
            "  {:<8} {:>5}  {:>5.1}%",
            severity,
            stats.counts_by_severity.get(severity),
            stats.severity_proportion(severity)
        );
    }
    for status in PatchStatus::ALL {
        println!("  {:<8} {:>5}", status, stats.counts_by_status.get(status));
    }
    Ok(())
}

fn print_event(event: &InventoryEvent) {
    match event {
        InventoryEvent::ServersUpdated => println!("servers updated"),
        InventoryEvent::PatchesUpdated { server_id } => {
            println!("patches updated for server {server_id}")
        }
        InventoryEvent::CollectionFailed { key, message } => {
            println!("{key} failed to load: {message}")
        }
        InventoryEvent::PatchStatusChanged {
            patch_id,
            server_id,
            status,
        } => println!("patch {patch_id} on server {server_id} is now {status}"),
        InventoryEvent::SelectionChanged(_) | InventoryEvent::Reset => {}
    }
}
