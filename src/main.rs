//! Warden — multi-server RCON supervisor and playtime monitor
//!
//! Maintains one supervised RCON connection per configured game server,
//! polls rosters to detect joins and leaves, accumulates durable playtime
//! statistics, and exposes a line-oriented administrative interface on
//! stdin. Monitor events stream into the structured log — a chat bridge
//! would subscribe at that seam instead.
//!
//! Usage:
//!   warden --config warden.json
//!   warden --config warden.json --verbose
//!   warden --config warden.json --log-file /var/log/warden.log

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use warden_monitor::{
    ConnectionSupervisor, MaintenanceTask, PlaytimeStore, RecoveryPolicy, RosterTracker,
    ScheduleConfig, Scheduler, StoreHandle, SupervisorConfig,
};
use warden_protocol::{MaintenanceOutcome, MonitorEvent, ServerProfile};

#[derive(Parser, Debug)]
#[command(name = "warden", about = "Warden — RCON supervisor and playtime monitor")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, default_value = "warden.json")]
    config: PathBuf,

    /// Override the playtime statistics file from the config
    #[arg(long)]
    stats_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// On-disk configuration: the server list plus cadences and timeouts.
/// Every duration is in seconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    servers: Vec<ServerProfile>,
    #[serde(default = "default_poll_interval")]
    poll_interval_secs: u64,
    #[serde(default = "default_health_interval")]
    health_interval_secs: u64,
    #[serde(default = "default_maintenance_interval")]
    maintenance_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    request_timeout_secs: u64,
    #[serde(default = "default_flush_interval")]
    flush_interval_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    shutdown_grace_secs: u64,
    #[serde(default = "default_stats_file")]
    stats_file: PathBuf,
    #[serde(default)]
    recovery_policy: RecoveryPolicy,
}

fn default_poll_interval() -> u64 {
    30
}
fn default_health_interval() -> u64 {
    30
}
fn default_maintenance_interval() -> u64 {
    3600
}
fn default_request_timeout() -> u64 {
    5
}
fn default_flush_interval() -> u64 {
    60
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_stats_file() -> PathBuf {
    PathBuf::from("player_stats.json")
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if let Some(path) = &cli.log_file {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let raw = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("reading config {}", cli.config.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("parsing config {}", cli.config.display()))?;

    anyhow::ensure!(!config.servers.is_empty(), "no servers configured");
    {
        let mut names: Vec<&str> = config.servers.iter().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        anyhow::ensure!(
            names.len() == config.servers.len(),
            "duplicate server profile names in config"
        );
    }

    let stats_file = cli.stats_file.unwrap_or(config.stats_file);
    let store = PlaytimeStore::load(stats_file.clone(), config.recovery_policy)
        .await
        .context("loading playtime store")?;
    let (store_handle, store_join) = store.spawn(Duration::from_secs(config.flush_interval_secs));

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor_config = SupervisorConfig {
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        health_timeout: Duration::from_secs(config.request_timeout_secs),
        ..SupervisorConfig::default()
    };
    let schedule = ScheduleConfig {
        health_interval: Duration::from_secs(config.health_interval_secs),
        poll_interval: Duration::from_secs(config.poll_interval_secs),
    };

    let mut scheduler = Scheduler::new(shutdown_rx);
    let mut supervisors: HashMap<String, Arc<ConnectionSupervisor>> = HashMap::new();

    for profile in config.servers {
        let profile = Arc::new(profile);
        let supervisor = ConnectionSupervisor::new(
            profile.clone(),
            supervisor_config.clone(),
            events_tx.clone(),
        );
        let tracker = RosterTracker::new(profile.clone(), events_tx.clone(), store_handle.clone());
        let maintenance = vec![MaintenanceTask::world_save(
            profile.kind,
            Duration::from_secs(config.maintenance_interval_secs),
        )];

        info!(
            profile = %profile.name,
            kind = %profile.kind,
            addr = %profile.addr(),
            "profile registered"
        );
        supervisors.insert(profile.name.clone(), supervisor.clone());
        scheduler.add_profile(supervisor, tracker, schedule.clone(), maintenance, events_tx.clone());
    }
    drop(events_tx);

    let notifier = tokio::spawn(notifier_loop(events_rx));

    info!(
        servers = supervisors.len(),
        stats = %stats_file.display(),
        "warden running; type '<profile> <command>' or 'players', Ctrl+C to stop"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received; shutting down"),
        _ = admin_loop(&supervisors, &store_handle) => info!("stdin closed; shutting down"),
    }

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    scheduler.shutdown(grace).await;
    drop(supervisors);

    // With every sender gone the store drains its queue and flushes once more.
    drop(store_handle);
    if tokio::time::timeout(grace, store_join).await.is_err() {
        warn!("playtime store did not stop within the grace period");
    }
    if tokio::time::timeout(grace, notifier).await.is_err() {
        warn!("event notifier did not stop within the grace period");
    }

    info!("warden stopped");
    Ok(())
}

/// The notifier seam: a deployment would forward these to a chat bridge;
/// the binary renders them into the structured log.
async fn notifier_loop(mut events: mpsc::UnboundedReceiver<MonitorEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            MonitorEvent::PlayerJoined {
                profile, player, ..
            } => info!(%profile, %player, "player joined"),
            MonitorEvent::PlayerLeft {
                profile,
                player,
                session_seconds,
                ..
            } => info!(%profile, %player, session_seconds, "player left"),
            MonitorEvent::ConnectionStateChanged { profile, from, to } => {
                info!(%profile, %from, %to, "connection state changed");
            }
            MonitorEvent::MaintenanceCompleted {
                profile,
                task,
                outcome,
            } => match outcome {
                MaintenanceOutcome::Succeeded { .. } => {
                    info!(%profile, %task, "maintenance completed");
                }
                MaintenanceOutcome::Failed { reason } => {
                    warn!(%profile, %task, %reason, "maintenance failed");
                }
            },
        }
    }
}

/// Line-oriented administrative surface on stdin:
///
/// ```text
/// <profile> <raw command...>   forward the command over RCON, print the reply
/// players                      print the accumulated playtime records
/// ```
///
/// Returns when stdin reaches EOF. Command failures are printed back to the
/// caller exactly as the error taxonomy reports them.
async fn admin_loop(
    supervisors: &HashMap<String, Arc<ConnectionSupervisor>>,
    store: &StoreHandle,
) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == "players" {
            let snapshot = store.snapshot().await;
            if snapshot.is_empty() {
                println!("no playtime records yet");
                continue;
            }
            let mut keys: Vec<&String> = snapshot.keys().collect();
            keys.sort();
            for key in keys {
                let record = &snapshot[key];
                println!(
                    "{key}: first join {}, total {}",
                    record.first_join.format("%Y-%m-%d %H:%M:%S"),
                    format_duration(record.total_playtime_seconds)
                );
            }
            continue;
        }

        let Some((name, command)) = line.split_once(char::is_whitespace) else {
            println!("usage: <profile> <command>, or: players");
            continue;
        };
        let Some(supervisor) = supervisors.get(name) else {
            let mut known: Vec<&String> = supervisors.keys().collect();
            known.sort();
            println!("unknown profile {name:?} (known: {known:?})");
            continue;
        };

        match supervisor.execute(command.trim()).await {
            Ok(response) => {
                let response = response.trim();
                if response.is_empty() {
                    println!("(no response)");
                } else {
                    println!("{response}");
                }
            }
            Err(err) => println!("error: {err}"),
        }
    }
}

/// "1h 4min 32sec" — the shape operators already expect from the stats file.
fn format_duration(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}min"));
    }
    parts.push(format!("{seconds}sec"));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(0), "0sec");
        assert_eq!(format_duration(125), "2min 5sec");
        assert_eq!(format_duration(3872), "1h 4min 32sec");
        assert_eq!(format_duration(7200), "2h 0sec");
    }

    #[test]
    fn config_defaults_apply() {
        let config: Config = serde_json::from_str(
            r#"{ "servers": [
                { "name": "mc", "kind": "minecraft", "host": "127.0.0.1", "port": 25575, "password": "x" }
            ] }"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_secs, 30);
        assert_eq!(config.maintenance_interval_secs, 3600);
        assert_eq!(config.stats_file, PathBuf::from("player_stats.json"));
        assert_eq!(config.recovery_policy, RecoveryPolicy::StartEmpty);
    }

    #[test]
    fn config_rejects_unknown_fields() {
        let result = serde_json::from_str::<Config>(r#"{ "servers": [], "nonsense": 1 }"#);
        assert!(result.is_err());
    }
}
