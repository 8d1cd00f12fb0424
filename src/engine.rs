// Scrobble decision engine
// Turns a stream of snapshots into at most one scrobble per listen

use crate::dedup::{DedupError, DedupStore};
use crate::fingerprint::Fingerprint;
use crate::scrobbler::{ScrobbleClient, ScrobbleRequest};
use crate::snapshot::Snapshot;
use chrono::{DateTime, Utc};

/// Scrobble once this percentage of the track has been played
pub const SCROBBLE_THRESHOLD_PERCENT: f64 = 50.0;

/// What the engine knows about the current track
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    /// No usable track seen yet
    NoTrack,
    /// Track is being observed and has not been reported
    Watching {
        identity: Fingerprint,
        length_seconds: f64,
        /// The service accepted the scrobble but the dedup record was not written
        pending_persist: bool,
    },
    /// Track has been reported, or matched the stored fingerprint
    Reported { identity: Fingerprint },
}

/// Result of feeding one snapshot to the engine
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Player is paused, stopped or in an unknown state
    NotPlaying,
    /// Track has no usable length, nothing can be decided
    NoLength,
    /// Same track as the one already reported
    AlreadyReported,
    /// Below the threshold
    Waiting { percentage: f64 },
    /// Threshold reached, but the stored fingerprint already covers this listen
    Deduplicated,
    /// Scrobble accepted and recorded
    Submitted,
    /// A previously accepted scrobble has now been recorded
    Persisted,
    /// The service rejected the scrobble or could not be reached
    SubmitFailed,
    /// The scrobble was accepted but recording it failed
    PersistFailed,
}

pub struct ScrobbleDecisionEngine<C, S> {
    client: C,
    store: S,
    last_reported: Option<Fingerprint>,
    state: EngineState,
}

impl<C: ScrobbleClient, S: DedupStore> ScrobbleDecisionEngine<C, S> {
    /// Create an engine, loading the last reported fingerprint from `store`
    ///
    /// An unreadable store is logged and treated as empty; at worst the
    /// current track is reported once more.
    pub fn new(client: C, store: S) -> Self {
        let last_reported = match store.load() {
            Ok(Some(fp)) => {
                log::info!("Loaded last scrobble: {}", fp);
                Some(fp)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!("Failed to load last scrobble, starting empty: {}", e);
                None
            }
        };

        Self {
            client,
            store,
            last_reported,
            state: EngineState::NoTrack,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    #[cfg(test)]
    pub fn last_reported(&self) -> Option<&Fingerprint> {
        self.last_reported.as_ref()
    }

    /// Feed one snapshot, using the current wall clock as scrobble time
    pub fn observe(&mut self, snapshot: &Snapshot) -> TickOutcome {
        self.observe_at(snapshot, Utc::now())
    }

    /// Feed one snapshot observed at `now`
    pub fn observe_at(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> TickOutcome {
        // Pausing keeps whatever progress was made
        if !snapshot.is_playing() {
            return TickOutcome::NotPlaying;
        }

        let identity = Fingerprint::of(snapshot);

        if !snapshot.has_length() {
            log::debug!(
                "No track length for {} ({}), waiting",
                snapshot.title,
                identity
            );
            return TickOutcome::NoLength;
        }

        if let EngineState::Reported { identity: prev } = &self.state {
            if *prev == identity {
                log::debug!("Scrobble already submitted for: {}", identity);
                return TickOutcome::AlreadyReported;
            }
        }

        let continuing = match &mut self.state {
            EngineState::Watching {
                identity: current,
                length_seconds,
                pending_persist,
            } if *current == identity => {
                *length_seconds = snapshot.length_seconds;
                Some(*pending_persist)
            }
            _ => None,
        };

        // A track change always restarts the decision for the new track
        let pending_persist = match continuing {
            Some(pending) => pending,
            None => {
                log::info!(
                    "New track: {} - {} ({})",
                    snapshot.artist(),
                    snapshot.title,
                    snapshot.format_length()
                );
                self.state = EngineState::Watching {
                    identity: identity.clone(),
                    length_seconds: snapshot.length_seconds,
                    pending_persist: false,
                };
                false
            }
        };

        let percentage = snapshot.play_percentage().unwrap_or(0.0);
        if percentage < SCROBBLE_THRESHOLD_PERCENT {
            log::debug!(
                "Playing: {} ({}) by {} ({:.2}%)",
                snapshot.title,
                identity,
                snapshot.artist(),
                percentage
            );
            return TickOutcome::Waiting { percentage };
        }

        if self.last_reported.as_ref() == Some(&identity) {
            log::info!(
                "Scrobble already recorded for: {} - {} ({})",
                snapshot.artist(),
                snapshot.title,
                identity
            );
            self.state = EngineState::Reported { identity };
            return TickOutcome::Deduplicated;
        }

        if !pending_persist {
            let request = ScrobbleRequest::from_snapshot(snapshot, now.timestamp());
            log::info!(
                "Scrobbling: {} - {} (played {} / {})",
                snapshot.artist(),
                snapshot.title,
                snapshot.format_position(),
                snapshot.format_length()
            );

            match self.client.submit(&request) {
                Ok(ack) => {
                    log::info!("Scrobble was submitted!");
                    log::debug!("Response: {:?}", ack);
                }
                Err(e) => {
                    log::warn!(
                        "Failed to scrobble {} ({}), will retry: {}; payload: {:?}",
                        snapshot.title,
                        identity,
                        e,
                        request
                    );
                    return TickOutcome::SubmitFailed;
                }
            }
        }

        match self.persist(&identity) {
            Ok(()) => {
                self.state = EngineState::Reported { identity };
                if pending_persist {
                    TickOutcome::Persisted
                } else {
                    TickOutcome::Submitted
                }
            }
            Err(e) => {
                log::error!(
                    "Scrobbled {} ({}) but failed to record it, will retry: {}",
                    snapshot.title,
                    identity,
                    e
                );
                self.state = EngineState::Watching {
                    identity,
                    length_seconds: snapshot.length_seconds,
                    pending_persist: true,
                };
                TickOutcome::PersistFailed
            }
        }
    }

    fn persist(&mut self, identity: &Fingerprint) -> Result<(), DedupError> {
        self.store.store(identity)?;
        self.last_reported = Some(identity.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::MemoryDedupStore;
    use crate::scrobbler::traits::Ack;
    use crate::scrobbler::ScrobbleError;
    use crate::snapshot::PlaybackStatus;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    /// Records submissions; fails while `fail` is set
    #[derive(Clone, Default)]
    struct FakeClient {
        submitted: Rc<RefCell<Vec<ScrobbleRequest>>>,
        fail: Rc<Cell<bool>>,
    }

    impl FakeClient {
        fn calls(&self) -> usize {
            self.submitted.borrow().len()
        }
    }

    impl ScrobbleClient for FakeClient {
        fn submit(&self, request: &ScrobbleRequest) -> Result<Ack, ScrobbleError> {
            if self.fail.get() {
                return Err(ScrobbleError::Status {
                    endpoint: "newscrobble",
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            self.submitted.borrow_mut().push(request.clone());
            Ok(Ack::Text("ok".to_string()))
        }
    }

    /// Memory store whose writes can be made to fail
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: Rc<RefCell<MemoryDedupStore>>,
        fail: Rc<Cell<bool>>,
        writes: Rc<Cell<usize>>,
    }

    impl DedupStore for FlakyStore {
        fn load(&self) -> Result<Option<Fingerprint>, DedupError> {
            self.inner.borrow().load()
        }

        fn store(&mut self, fingerprint: &Fingerprint) -> Result<(), DedupError> {
            if self.fail.get() {
                return Err(DedupError::Io {
                    action: "write",
                    path: "last_scrobble".into(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.writes.set(self.writes.get() + 1);
            self.inner.borrow_mut().store(fingerprint)
        }
    }

    fn track(title: &str, position: f64, length: f64) -> Snapshot {
        Snapshot {
            title: title.to_string(),
            artists: vec!["X".to_string()],
            album: "Album".to_string(),
            length_seconds: length,
            position_seconds: position,
            status: PlaybackStatus::Playing,
            ..Default::default()
        }
    }

    fn paused(mut snapshot: Snapshot) -> Snapshot {
        snapshot.status = PlaybackStatus::Paused;
        snapshot
    }

    fn engine() -> (
        ScrobbleDecisionEngine<FakeClient, FlakyStore>,
        FakeClient,
        FlakyStore,
    ) {
        let client = FakeClient::default();
        let store = FlakyStore::default();
        let engine = ScrobbleDecisionEngine::new(client.clone(), store.clone());
        (engine, client, store)
    }

    fn at(ts: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(ts, 0).unwrap()
    }

    #[test]
    fn test_scenario_a_then_b() {
        let (mut engine, client, store) = engine();
        let a = |pos| track("A", pos, 200.0);

        assert_eq!(
            engine.observe_at(&a(50.0), at(1000)),
            TickOutcome::Waiting { percentage: 25.0 }
        );
        assert_eq!(client.calls(), 0);

        assert_eq!(engine.observe_at(&a(110.0), at(1060)), TickOutcome::Submitted);
        assert_eq!(client.calls(), 1);
        let request = client.submitted.borrow()[0].clone();
        assert_eq!(request.title, "A");
        assert_eq!(request.artists, vec!["X".to_string()]);
        assert_eq!(request.duration, Some(110.0));
        assert_eq!(request.length, Some(200.0));
        assert_eq!(request.timestamp, Some(1060));

        let fp_a = Fingerprint::of(&a(0.0));
        assert_eq!(store.load().unwrap(), Some(fp_a.clone()));
        assert_eq!(engine.state(), &EngineState::Reported { identity: fp_a });

        assert_eq!(engine.observe_at(&a(150.0), at(1100)), TickOutcome::AlreadyReported);
        assert_eq!(client.calls(), 1);

        let b = track("B", 5.0, 180.0);
        assert!(matches!(
            engine.observe_at(&b, at(1200)),
            TickOutcome::Waiting { .. }
        ));
        assert_eq!(
            engine.state(),
            &EngineState::Watching {
                identity: Fingerprint::of(&b),
                length_seconds: 180.0,
                pending_persist: false,
            }
        );
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_threshold_fires_once() {
        let (mut engine, client, _) = engine();
        for pos in (0..=200).step_by(5) {
            engine.observe(&track("A", pos as f64, 200.0));
        }
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_exactly_half_triggers() {
        let (mut engine, client, _) = engine();
        assert_eq!(engine.observe(&track("A", 100.0, 200.0)), TickOutcome::Submitted);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_restart_with_stored_fingerprint_never_submits() {
        for position in [100.0, 150.0, 199.0] {
            let client = FakeClient::default();
            let store = FlakyStore::default();
            store
                .inner
                .borrow_mut()
                .store(&Fingerprint::of(&track("A", 0.0, 200.0)))
                .unwrap();

            let mut engine = ScrobbleDecisionEngine::new(client.clone(), store.clone());
            assert_eq!(
                engine.observe(&track("A", position, 200.0)),
                TickOutcome::Deduplicated
            );
            assert_eq!(client.calls(), 0);
            assert_eq!(store.writes.get(), 0);
            assert!(matches!(engine.state(), EngineState::Reported { .. }));
        }
    }

    #[test]
    fn test_zero_length_never_submits() {
        let (mut engine, client, _) = engine();
        for pos in [0.0, 50.0, 500.0, 10_000.0] {
            assert_eq!(engine.observe(&track("Stream", pos, 0.0)), TickOutcome::NoLength);
        }
        assert_eq!(client.calls(), 0);
        assert_eq!(engine.state(), &EngineState::NoTrack);
    }

    #[test]
    fn test_not_playing_makes_no_decision() {
        let (mut engine, client, _) = engine();
        for status in [
            PlaybackStatus::Paused,
            PlaybackStatus::Stopped,
            PlaybackStatus::Unknown,
        ] {
            let mut s = track("A", 150.0, 200.0);
            s.status = status;
            assert_eq!(engine.observe(&s), TickOutcome::NotPlaying);
        }
        assert_eq!(client.calls(), 0);
        assert_eq!(engine.state(), &EngineState::NoTrack);
    }

    #[test]
    fn test_pause_keeps_progress() {
        let (mut engine, client, _) = engine();
        engine.observe(&track("A", 80.0, 200.0));
        let watching = engine.state().clone();

        assert_eq!(
            engine.observe(&paused(track("A", 90.0, 200.0))),
            TickOutcome::NotPlaying
        );
        assert_eq!(engine.state(), &watching);

        assert_eq!(engine.observe(&track("A", 100.0, 200.0)), TickOutcome::Submitted);
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn test_skip_before_half_never_scrobbles() {
        let (mut engine, client, _) = engine();
        engine.observe(&track("A", 90.0, 200.0));
        engine.observe(&track("B", 10.0, 200.0));
        engine.observe(&track("B", 20.0, 200.0));
        assert_eq!(client.calls(), 0);
    }

    #[test]
    fn test_transient_failure_retries_next_tick() {
        let (mut engine, client, store) = engine();
        client.fail.set(true);

        assert_eq!(engine.observe(&track("A", 120.0, 200.0)), TickOutcome::SubmitFailed);
        assert!(matches!(engine.state(), EngineState::Watching { .. }));
        assert_eq!(store.load().unwrap(), None);

        assert_eq!(engine.observe(&track("A", 121.0, 200.0)), TickOutcome::SubmitFailed);

        client.fail.set(false);
        assert_eq!(engine.observe(&track("A", 122.0, 200.0)), TickOutcome::Submitted);
        assert_eq!(client.calls(), 1);
        assert_eq!(
            store.load().unwrap(),
            Some(Fingerprint::of(&track("A", 0.0, 200.0)))
        );
    }

    #[test]
    fn test_persist_failure_retries_without_resubmitting() {
        let (mut engine, client, store) = engine();
        store.fail.set(true);

        assert_eq!(engine.observe(&track("A", 120.0, 200.0)), TickOutcome::PersistFailed);
        assert_eq!(client.calls(), 1);
        assert!(matches!(
            engine.state(),
            EngineState::Watching {
                pending_persist: true,
                ..
            }
        ));
        assert_eq!(engine.last_reported(), None);

        assert_eq!(engine.observe(&track("A", 121.0, 200.0)), TickOutcome::PersistFailed);
        assert_eq!(client.calls(), 1);

        store.fail.set(false);
        assert_eq!(engine.observe(&track("A", 122.0, 200.0)), TickOutcome::Persisted);
        assert_eq!(client.calls(), 1);
        assert!(matches!(engine.state(), EngineState::Reported { .. }));
        assert_eq!(store.writes.get(), 1);
    }

    #[test]
    fn test_track_change_restarts_in_watching() {
        let (mut engine, client, _) = engine();
        engine.observe(&track("A", 150.0, 200.0));
        assert_eq!(client.calls(), 1);

        engine.observe(&track("B", 10.0, 200.0));
        assert!(matches!(engine.state(), EngineState::Watching { .. }));

        // Returning to A starts a fresh decision
        engine.observe(&track("A", 10.0, 200.0));
        assert_eq!(
            engine.state(),
            &EngineState::Watching {
                identity: Fingerprint::of(&track("A", 0.0, 200.0)),
                length_seconds: 200.0,
                pending_persist: false,
            }
        );
    }

    #[test]
    fn test_replay_after_other_track_is_reported_again() {
        let (mut engine, client, _) = engine();
        engine.observe(&track("A", 150.0, 200.0));
        engine.observe(&track("B", 150.0, 200.0));
        engine.observe(&track("A", 150.0, 200.0));
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn test_track_first_seen_past_threshold_submits_immediately() {
        let (mut engine, client, _) = engine();
        assert_eq!(engine.observe(&track("A", 190.0, 200.0)), TickOutcome::Submitted);
        assert_eq!(client.calls(), 1);
    }
}
