// MPRIS scrobbler
// Reports listens from an MPRIS2 media player to a Maloja server

mod config;
mod dedup;
mod engine;
mod fingerprint;
mod media_monitor;
mod player;
mod scrobbler;
mod snapshot;
mod text_cleanup;

use anyhow::{Context, Result};
use backoff::ExponentialBackoff;
use chrono::{DateTime, Local};
use clap::Parser;
use config::Config;
use dedup::FileDedupStore;
use engine::ScrobbleDecisionEngine;
use log::LevelFilter;
use media_monitor::{spawn_decision_loop, spawn_watcher, DecisionLoop, SnapshotSlot, Watcher};
use player::{MprisBridge, PlayerBridge};
use scrobbler::{MalojaClient, ScrobbleError};
use std::path::PathBuf;
use std::time::Duration;
use text_cleanup::TextCleaner;

/// Directory name used under the config and data directories
pub const APP_NAME: &str = "mpris-scrobbler";

/// How long the startup connectivity check may keep retrying
const PROBE_MAX_ELAPSED: Duration = Duration::from_secs(10);

/// Scrobble tracks from MPRIS2 media players to a Maloja server
#[derive(Debug, Parser)]
#[command(name = "mpris-scrobbler", version, about)]
struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List all active MPRIS2 media players and exit
    #[arg(long)]
    list_players: bool,

    /// Show the most recent scrobbles on the server and exit
    #[arg(long, conflicts_with = "list_players")]
    recent: bool,

    /// Set the log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_players {
        init_logger(LevelFilter::Info);
        return list_players();
    }

    init_logger(cli.log_level);

    if cli.recent {
        return show_recent(&cli);
    }

    run(&cli)
}

fn init_logger(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format_timestamp_secs();
    builder.parse_env("RUST_LOG");

    if !atty::is(atty::Stream::Stderr) {
        builder.write_style(env_logger::WriteStyle::Never);
    }

    builder.init();
}

fn list_players() -> Result<()> {
    let bridge = MprisBridge::connect(TextCleaner::disabled())?;
    let players = bridge.list_players()?;

    log::info!("Currently active MPRIS2 media players:");
    if players.is_empty() {
        println!("(none)");
    }
    for player in players {
        println!("\t{}", player);
    }
    Ok(())
}

fn build_client(config: &Config) -> MalojaClient {
    MalojaClient::new(
        config.maloja.api_url.clone(),
        config.maloja.api_key.clone(),
        config.request_timeout(),
    )
}

fn show_recent(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let client = build_client(&config);

    let recent = client
        .recent_scrobbles()
        .context("Failed to fetch recent scrobbles")?;

    for scrobble in recent {
        let when = DateTime::from_timestamp(scrobble.time, 0)
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| scrobble.time.to_string());
        println!(
            "{}  {} - {}",
            when,
            scrobble.track.artists.join(", "),
            scrobble.track.title
        );
    }
    Ok(())
}

/// Check the server once at startup; failures are only logged
fn probe_connection(client: &MalojaClient) {
    log::debug!("Trying to log in to Maloja...");

    let policy = ExponentialBackoff {
        max_elapsed_time: Some(PROBE_MAX_ELAPSED),
        ..Default::default()
    };

    let result = backoff::retry(policy, || {
        client.test_connection().map_err(|e| match e {
            // A rejected key will not fix itself
            ScrobbleError::Status { status, .. } if (400..500).contains(&status) => {
                backoff::Error::permanent(e)
            }
            e => backoff::Error::transient(e),
        })
    });

    match result {
        Ok(_) => log::info!("Successfully logged in to Maloja at {}", client.api_url()),
        Err(e) => log::warn!("Error logging in to Maloja: {}", e),
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let interval = config.refresh_interval();

    let client = build_client(&config);
    probe_connection(&client);

    let dedup_path = match config.dedup_path.clone() {
        Some(path) => path,
        None => FileDedupStore::default_path().context("Failed to get data directory")?,
    };
    let store = FileDedupStore::new(dedup_path);
    log::debug!("Last scrobble is kept at {:?}", store.path());
    let engine = ScrobbleDecisionEngine::new(client, store);

    let bridge = MprisBridge::connect(TextCleaner::new(&config.cleanup))?;
    let slot = SnapshotSlot::default();

    // Dropping the sender stops both loops
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);

    let watcher = spawn_watcher(
        Watcher::new(bridge, config.player_uri.clone(), slot.clone()),
        interval,
        shutdown_rx.clone(),
    )
    .context("Failed to start player watcher")?;

    let decisions = spawn_decision_loop(DecisionLoop::new(engine, slot), interval, shutdown_rx)
        .context("Failed to start decision loop")?;

    wait_for_ctrl_c()?;
    log::info!("Shutting down");
    drop(shutdown_tx);

    for (name, handle) in [("player watcher", watcher), ("decision loop", decisions)] {
        if handle.join().is_err() {
            log::error!("The {} thread panicked", name);
        }
    }

    Ok(())
}

fn wait_for_ctrl_c() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;

    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")
}
