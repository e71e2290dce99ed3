//! # Rotation Queue State Machine
//!
//! [`Rotation`] owns the on-air state of one stream: the current track, when
//! it started and ends, and the pre-selected next track. It is the single
//! authority for that stream; every operation reads and writes the persisted
//! state directly, so a restarted process picks up exactly where the last
//! one stopped.
//!
//! ## States
//!
//! ```text
//!            start_immediately(id)
//!  Waiting ────────────────────────▶ Playing ──┐ advance(): promote next
//!     ▲                                 │  ▲    │ or select a fresh track
//!     └──── advance(): nothing left ────┘  └────┘
//! ```
//!
//! While `Playing`, exactly one wake-up is armed for `current_ends_at`. Every
//! transition overwrites it. `Waiting` has no wake-up.
//!
//! ## Advancing
//!
//! `advance` is only ever invoked by wake-up delivery. Any error it returns
//! makes the delivery retry the whole call, so each step is safe to repeat:
//! the finished play is recorded under its `started_at` (a repeat is
//! ignored), and re-selecting and re-arming simply overwrite.
//!
//! ## Mutual exclusion
//!
//! Operations take `&mut self` or `&self` on a single instance; the host is
//! expected to serialize calls against one stream.

use crate::catalog::{Catalog, Millis, SqliteCatalog, TrackCandidate, TrackId};
use crate::config::RotationConfig;
use crate::db;
use crate::error::RotationError;
use crate::history::{self, HistoryEntry};
use crate::invalidation::{CacheInvalidation, NoopInvalidation};
use crate::scheduler::{Clock, SqliteWakeSlot, SystemClock, WakeScheduler};
use crate::selector::{self, Exclusions};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted on-air state.
///
/// The three `current_*` fields are either all set (playing) or all `None`
/// (waiting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub current_track_id: Option<TrackId>,
    pub current_started_at: Option<Millis>,
    pub current_ends_at: Option<Millis>,
    pub next_track_id: Option<TrackId>,
}

impl QueueState {
    /// Playing state for `track` starting at `now`.
    ///
    /// A non-positive duration is stretched to 1ms so the track still ends
    /// strictly after it starts.
    #[must_use]
    pub fn playing(track: &TrackCandidate, now: Millis, next_track_id: Option<TrackId>) -> Self {
        Self {
            current_track_id: Some(track.id),
            current_started_at: Some(now),
            current_ends_at: Some(now.saturating_add(track.duration_ms.max(1))),
            next_track_id,
        }
    }

    #[must_use]
    pub const fn is_waiting(&self) -> bool {
        self.current_track_id.is_none()
    }

    /// Whether the null-together invariant (and `ends > started`) holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match (
            self.current_track_id,
            self.current_started_at,
            self.current_ends_at,
        ) {
            (None, None, None) => true,
            (Some(_), Some(started), Some(ends)) => ends > started,
            _ => false,
        }
    }
}

/// Result of [`Rotation::start_immediately`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(QueueState),
    /// Already playing with a wake-up armed; nothing was changed.
    AlreadyStarted(QueueState),
}

/// Result of [`Rotation::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Nothing on air; a stale or duplicate wake-up.
    Idle,
    /// Fired well before the current track ends; re-armed for `ends_at`.
    NotDue { ends_at: Millis },
    /// `track_id` is now on air. `fallback` is set when it came from a fresh
    /// selection rather than the pre-selected next track.
    Promoted { track_id: TrackId, fallback: bool },
    /// Nothing could be selected; the rotation is waiting.
    Waiting,
}

/// The rotation state machine for one stream.
pub struct Rotation {
    conn: Connection,
    catalog: Box<dyn Catalog>,
    alarm: Box<dyn WakeScheduler>,
    invalidation: Box<dyn CacheInvalidation>,
    clock: Box<dyn Clock>,
    rng: Box<dyn RngCore>,
    config: RotationConfig,
}

impl Rotation {
    /// Build a rotation over an open state connection.
    ///
    /// Initializes the schema before anything else runs. The clock defaults
    /// to the wall clock, the RNG to an entropy-seeded `StdRng` and the
    /// invalidation signal to a no-op.
    pub fn new(
        conn: Connection,
        catalog: Box<dyn Catalog>,
        alarm: Box<dyn WakeScheduler>,
        config: RotationConfig,
    ) -> Result<Self> {
        db::init_schema(&conn).context("Failed to initialize rotation storage")?;

        Ok(Self {
            conn,
            catalog,
            alarm,
            invalidation: Box::new(NoopInvalidation),
            clock: Box::new(SystemClock),
            rng: Box::new(StdRng::from_entropy()),
            config,
        })
    }

    /// Open the rotation stored in `db_path`, using its `tracks` table as
    /// the catalog and its `wake_alarm` table as the wake slot.
    pub fn open(db_path: &Path, config: RotationConfig) -> Result<Self> {
        let conn = db::connect(db_path)?;
        let catalog = SqliteCatalog::new(db::connect(db_path)?);
        let alarm = SqliteWakeSlot::new(db::connect(db_path)?);

        Self::new(conn, Box::new(catalog), Box::new(alarm), config)
    }

    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    #[must_use]
    pub fn with_rng(mut self, rng: impl RngCore + 'static) -> Self {
        self.rng = Box::new(rng);
        self
    }

    #[must_use]
    pub fn with_invalidation(mut self, invalidation: impl CacheInvalidation + 'static) -> Self {
        self.invalidation = Box::new(invalidation);
        self
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Put `track_id` on air right now, unless the rotation is already
    /// playing with a wake-up armed.
    ///
    /// # Errors
    ///
    /// [`RotationError::TrackNotFound`] if `track_id` is not in the catalog,
    /// plus any storage error.
    pub fn start_immediately(&mut self, track_id: TrackId) -> Result<StartOutcome> {
        let state = db::load_state(&self.conn)?;
        if !state.is_waiting() && self.alarm.scheduled_wake()?.is_some() {
            info!(
                "Rotation already started (track {:?} on air), ignoring start of {track_id}",
                state.current_track_id
            );
            return Ok(StartOutcome::AlreadyStarted(state));
        }

        let track = self
            .catalog
            .fetch_by_id(track_id)?
            .ok_or(RotationError::TrackNotFound(track_id))?;
        let now = self.clock.now_ms();

        // Pre-selecting the next track is best-effort here.
        let next = match self.pick_next(track.id, now) {
            Ok(next) => next,
            Err(err) => {
                warn!("Could not pre-select next track: {err:#}");
                None
            }
        };

        let new_state = QueueState::playing(&track, now, next);
        self.commit_playing(&new_state)?;

        info!(
            "Started rotation with track {} until {:?}, next {:?}",
            track.id, new_state.current_ends_at, new_state.next_track_id
        );
        Ok(StartOutcome::Started(new_state))
    }

    /// Wake-up handler: move the rotation past the track that just ended.
    ///
    /// # Errors
    ///
    /// Storage and catalog failures are returned so the caller can retry
    /// the whole call.
    pub fn advance(&mut self) -> Result<AdvanceOutcome> {
        let state = db::load_state(&self.conn)?;
        let (Some(current_id), Some(started_at), Some(ends_at)) = (
            state.current_track_id,
            state.current_started_at,
            state.current_ends_at,
        ) else {
            debug!("Wake-up with nothing on air, ignoring");
            return Ok(AdvanceOutcome::Idle);
        };

        let now = self.clock.now_ms();
        if now.saturating_add(self.config.wake.early_tolerance_ms) < ends_at {
            debug!("Wake-up at {now} before track {current_id} ends at {ends_at}, re-arming");
            self.alarm.set_wake_at(ends_at)?;
            return Ok(AdvanceOutcome::NotDue { ends_at });
        }

        self.record_finished(current_id, started_at, now)?;

        if let Some(next_id) = state.next_track_id {
            if let Some(next) = self.catalog.fetch_by_id(next_id)? {
                return self.promote(&next, now, false);
            }
            info!("Pre-selected track {next_id} left the catalog, selecting afresh");
        }

        let candidates = self.catalog.fetch_all()?;
        if candidates.is_empty() {
            info!("Catalog is empty");
            return self.enter_waiting();
        }

        let exclusions = history::exclusions(&self.conn, &self.config.selection)?;
        let picked = selector::select(
            &candidates,
            &exclusions,
            now,
            &self.config.selection,
            &self.config.weights,
            &mut *self.rng,
        )
        .cloned();

        match picked {
            Some(track) => self.promote(&track, now, true),
            None => {
                info!("No eligible track among {} candidates", candidates.len());
                self.enter_waiting()
            }
        }
    }

    /// Snapshot of the persisted state.
    pub fn get_current_state(&self) -> Result<QueueState> {
        db::load_state(&self.conn)
    }

    /// The pre-selected next track, if any.
    pub fn get_next_track_id(&self) -> Result<Option<TrackId>> {
        Ok(db::load_state(&self.conn)?.next_track_id)
    }

    /// Simulate the next `depth` selections without touching any state.
    ///
    /// Starts from the real history exclusions plus the track on air, the
    /// same set the next real pick sees, and only grows the id exclusions
    /// with each simulated pick. Stops early once the selector has nothing
    /// left to offer.
    pub fn get_queue_preview(&mut self, depth: usize) -> Result<Vec<TrackCandidate>> {
        let candidates = self.catalog.fetch_all()?;
        let mut exclusions = history::exclusions(&self.conn, &self.config.selection)?;
        if let Some(current_id) = db::load_state(&self.conn)?.current_track_id {
            exclusions.track_ids.insert(current_id);
        }
        let now = self.clock.now_ms();

        let mut preview = Vec::with_capacity(depth);
        while preview.len() < depth {
            let Some(pick) = selector::select(
                &candidates,
                &exclusions,
                now,
                &self.config.selection,
                &self.config.weights,
                &mut *self.rng,
            ) else {
                break;
            };
            exclusions.track_ids.insert(pick.id);
            preview.push(pick.clone());
        }

        debug!("Previewed {} of {depth} requested tracks", preview.len());
        Ok(preview)
    }

    /// Latest finished plays, newest first.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        history::recent_entries(&self.conn, limit)
    }

    /// The armed wake-up, if any.
    pub fn scheduled_wake(&self) -> Result<Option<Millis>> {
        self.alarm.scheduled_wake()
    }

    /// Current time as seen by this rotation.
    pub fn now_ms(&self) -> Millis {
        self.clock.now_ms()
    }

    /// Clear the wake slot if it still holds the consumed wake-up `due`.
    pub(crate) fn consume_wake(&mut self, due: Millis) -> Result<()> {
        if self.alarm.scheduled_wake()? == Some(due) {
            self.alarm.clear_wake()?;
        }
        Ok(())
    }

    fn record_finished(&mut self, track_id: TrackId, started_at: Millis, now: Millis) -> Result<()> {
        let Some(track) = self.catalog.fetch_by_id(track_id)? else {
            warn!("Finished track {track_id} left the catalog, not recording it");
            return Ok(());
        };

        let entry = HistoryEntry {
            track_id,
            artist_id: track.artist_id,
            played_at: now,
            started_at,
        };
        history::record_play(&self.conn, &entry)?;

        let cutoff = now.saturating_sub(self.config.history_retention_ms);
        if let Err(err) = history::prune_older_than(&self.conn, cutoff) {
            warn!("History pruning failed: {err:#}");
        }
        Ok(())
    }

    /// Select the track to follow `current_id`.
    fn pick_next(&mut self, current_id: TrackId, now: Millis) -> Result<Option<TrackId>> {
        let candidates = self.catalog.fetch_all()?;
        let mut exclusions: Exclusions = history::exclusions(&self.conn, &self.config.selection)?;
        exclusions.track_ids.insert(current_id);

        Ok(selector::select(
            &candidates,
            &exclusions,
            now,
            &self.config.selection,
            &self.config.weights,
            &mut *self.rng,
        )
        .map(|c| c.id))
    }

    fn promote(&mut self, track: &TrackCandidate, now: Millis, fallback: bool) -> Result<AdvanceOutcome> {
        let next = self.pick_next(track.id, now)?;
        let new_state = QueueState::playing(track, now, next);
        self.commit_playing(&new_state)?;

        info!(
            "Now playing track {} until {:?} ({}), next {:?}",
            track.id,
            new_state.current_ends_at,
            if fallback { "fresh selection" } else { "pre-selected" },
            next
        );
        Ok(AdvanceOutcome::Promoted { track_id: track.id, fallback })
    }

    fn commit_playing(&mut self, state: &QueueState) -> Result<()> {
        db::save_state(&mut self.conn, state)?;
        if let Some(ends_at) = state.current_ends_at {
            self.alarm.set_wake_at(ends_at)?;
        }
        self.signal_invalidation();
        Ok(())
    }

    fn enter_waiting(&mut self) -> Result<AdvanceOutcome> {
        db::save_state(&mut self.conn, &QueueState::default())?;
        self.alarm.clear_wake()?;
        self.signal_invalidation();

        info!("Rotation is waiting");
        Ok(AdvanceOutcome::Waiting)
    }

    fn signal_invalidation(&self) {
        if let Err(err) = self.invalidation.signal() {
            warn!("Cache invalidation signal failed: {err:#}");
        }
    }
}
