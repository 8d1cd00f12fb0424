// Media monitoring module
// Watches the player on one thread and runs scrobble decisions on another

use crate::dedup::DedupStore;
use crate::engine::{ScrobbleDecisionEngine, TickOutcome};
use crate::player::{select_player, PlayerBridge};
use crate::scrobbler::ScrobbleClient;
use crate::snapshot::Snapshot;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long to wait before looking for a player again
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Latest observation of the player, shared between the watcher and the decision loop
///
/// Snapshots are swapped in whole, so readers never see a half-updated one.
#[derive(Debug, Clone, Default)]
pub struct SnapshotSlot(Arc<RwLock<Option<Snapshot>>>);

impl SnapshotSlot {
    pub fn publish(&self, snapshot: Snapshot) {
        *self.0.write() = Some(snapshot);
    }

    pub fn clear(&self) {
        self.0.write().take();
    }

    pub fn latest(&self) -> Option<Snapshot> {
        self.0.read().clone()
    }
}

/// Outcome of one watcher iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchStep {
    /// No matching player is available
    NoPlayer,
    /// Player has no current track
    Idle,
    /// A fresh snapshot was published
    Published,
    /// The player went away; it will be looked up again
    Lost,
}

/// Polls the player bridge and publishes snapshots into the slot
pub struct Watcher<B> {
    bridge: B,
    wanted: Option<String>,
    current: Option<String>,
    slot: SnapshotSlot,
}

impl<B: PlayerBridge> Watcher<B> {
    pub fn new(bridge: B, wanted: Option<String>, slot: SnapshotSlot) -> Self {
        Self {
            bridge,
            wanted,
            current: None,
            slot,
        }
    }

    fn connect(&mut self) -> Option<String> {
        let players = match self.bridge.list_players() {
            Ok(players) => players,
            Err(e) => {
                log::warn!("Failed to list players: {:#}", e);
                return None;
            }
        };

        let uri = select_player(&players, self.wanted.as_deref())?;
        log::info!("Listening to events from player: {}", uri);
        self.current = Some(uri.clone());
        Some(uri)
    }

    /// One observation: find a player if needed, then refresh the slot
    pub fn step(&mut self) -> WatchStep {
        let uri = match self.current.clone().or_else(|| self.connect()) {
            Some(uri) => uri,
            None => {
                self.slot.clear();
                return WatchStep::NoPlayer;
            }
        };

        match self.bridge.snapshot(&uri) {
            Ok(Some(snapshot)) => {
                log::trace!("{}", snapshot);
                self.slot.publish(snapshot);
                WatchStep::Published
            }
            Ok(None) => {
                self.slot.clear();
                WatchStep::Idle
            }
            Err(e) => {
                log::warn!("Lost player {}: {:#}", uri, e);
                self.current = None;
                self.slot.clear();
                WatchStep::Lost
            }
        }
    }

    /// Run until `shutdown` fires or is dropped
    pub fn run(mut self, interval: Duration, shutdown: Receiver<()>) {
        loop {
            let delay = match self.step() {
                WatchStep::NoPlayer => RECONNECT_DELAY,
                _ => interval,
            };
            if should_stop(&shutdown, delay) {
                break;
            }
        }
        log::debug!("Player watcher stopped");
    }
}

/// Feeds the latest snapshot to the engine at a fixed cadence
pub struct DecisionLoop<C, S> {
    engine: ScrobbleDecisionEngine<C, S>,
    slot: SnapshotSlot,
}

impl<C: ScrobbleClient, S: DedupStore> DecisionLoop<C, S> {
    pub fn new(engine: ScrobbleDecisionEngine<C, S>, slot: SnapshotSlot) -> Self {
        Self { engine, slot }
    }

    /// Decide against the latest snapshot, if any
    pub fn tick(&mut self) -> Option<TickOutcome> {
        let snapshot = self.slot.latest()?;
        Some(self.engine.observe(&snapshot))
    }

    #[cfg(test)]
    pub fn engine(&self) -> &ScrobbleDecisionEngine<C, S> {
        &self.engine
    }

    /// Run until `shutdown` fires or is dropped
    ///
    /// Shutdown is only checked between ticks, so a decision step is
    /// always applied completely or not at all.
    pub fn run(mut self, interval: Duration, shutdown: Receiver<()>) {
        loop {
            self.tick();
            if should_stop(&shutdown, interval) {
                break;
            }
        }
        log::debug!("Decision loop stopped");
    }
}

/// Sleep for `delay`, returning true once shutdown has been requested
fn should_stop(shutdown: &Receiver<()>, delay: Duration) -> bool {
    match shutdown.recv_timeout(delay) {
        Err(RecvTimeoutError::Timeout) => false,
        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
    }
}

/// Start the player watcher on its own thread
pub fn spawn_watcher<B>(
    watcher: Watcher<B>,
    interval: Duration,
    shutdown: Receiver<()>,
) -> std::io::Result<JoinHandle<()>>
where
    B: PlayerBridge + Send + 'static,
{
    thread::Builder::new()
        .name("player-watcher".to_string())
        .spawn(move || watcher.run(interval, shutdown))
}

/// Start the decision loop on its own thread
pub fn spawn_decision_loop<C, S>(
    decisions: DecisionLoop<C, S>,
    interval: Duration,
    shutdown: Receiver<()>,
) -> std::io::Result<JoinHandle<()>>
where
    C: ScrobbleClient + Send + 'static,
    S: DedupStore + Send + 'static,
{
    thread::Builder::new()
        .name("scrobble-decisions".to_string())
        .spawn(move || decisions.run(interval, shutdown))
}
