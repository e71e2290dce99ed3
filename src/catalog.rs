//! # Track Catalog
//!
//! The catalog is the authoritative store of track metadata. The rotation
//! only reads from it, and it reads fresh on every call: boosts grow and
//! tracks come and go while the stream is running, so candidate lists are
//! never cached between selections.
//!
//! [`SqliteCatalog`] reads the `tracks` table of the rotation database and
//! carries the small write API the CLI uses to maintain it.
//! [`MemoryCatalog`] is a shared in-process catalog for embedding and tests.

use crate::error::RotationError;
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Catalog identity of a track.
pub type TrackId = i64;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Snapshot of one track as the rotation sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackCandidate {
    pub id: TrackId,
    /// Creation time in milliseconds.
    pub created_at: Millis,
    /// Accumulated boost, non-negative and never decreasing.
    pub boost_value: f64,
    pub artist_id: String,
    /// Playback length in milliseconds.
    pub duration_ms: i64,
}

/// Read-only view of the track store.
pub trait Catalog {
    /// Every track currently in the catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn fetch_all(&self) -> Result<Vec<TrackCandidate>>;

    /// One track, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read.
    fn fetch_by_id(&self, id: TrackId) -> Result<Option<TrackCandidate>>;
}

const TRACK_COLUMNS: &str = "id, created_at, boost_value, artist_id, duration_ms";

fn track_from_row(row: &Row<'_>) -> rusqlite::Result<TrackCandidate> {
    Ok(TrackCandidate {
        id: row.get(0)?,
        created_at: row.get(1)?,
        boost_value: row.get(2)?,
        artist_id: row.get(3)?,
        duration_ms: row.get(4)?,
    })
}

/// Catalog backed by the `tracks` table.
pub struct SqliteCatalog {
    conn: Connection,
}

impl SqliteCatalog {
    /// Wrap a connection whose schema has already been initialized.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Insert or replace a track.
    ///
    /// # Errors
    ///
    /// Rejects non-positive durations and negative boosts with
    /// [`RotationError::InvalidTrack`], and propagates SQL errors.
    pub fn add_track(&self, track: &TrackCandidate) -> Result<()> {
        if track.duration_ms <= 0 {
            return Err(RotationError::InvalidTrack(format!(
                "track {} has non-positive duration {}ms",
                track.id, track.duration_ms
            ))
            .into());
        }
        if track.boost_value < 0.0 || !track.boost_value.is_finite() {
            return Err(RotationError::InvalidTrack(format!(
                "track {} has invalid boost {}",
                track.id, track.boost_value
            ))
            .into());
        }

        self.conn
            .execute(
                "INSERT OR REPLACE INTO tracks (id, created_at, boost_value, artist_id, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    track.id,
                    track.created_at,
                    track.boost_value,
                    &track.artist_id,
                    track.duration_ms,
                ),
            )
            .with_context(|| format!("Failed to insert track {}", track.id))?;

        log::debug!("Catalogued track {} by {}", track.id, track.artist_id);
        Ok(())
    }

    /// Remove a track. Returns whether it existed.
    pub fn remove_track(&self, id: TrackId) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM tracks WHERE id = ?1", [id])
            .with_context(|| format!("Failed to delete track {id}"))?;
        Ok(removed > 0)
    }

    /// Add `amount` to a track's boost and return the new total.
    ///
    /// # Errors
    ///
    /// Boost never decreases, so a negative amount is rejected. A missing
    /// track is [`RotationError::TrackNotFound`].
    pub fn add_boost(&self, id: TrackId, amount: f64) -> Result<f64> {
        if amount < 0.0 || !amount.is_finite() {
            return Err(RotationError::InvalidTrack(format!(
                "boost increment for track {id} must be non-negative, got {amount}"
            ))
            .into());
        }

        let updated = self
            .conn
            .execute(
                "UPDATE tracks SET boost_value = boost_value + ?1 WHERE id = ?2",
                (amount, id),
            )
            .with_context(|| format!("Failed to boost track {id}"))?;
        if updated == 0 {
            return Err(RotationError::TrackNotFound(id).into());
        }

        self.conn
            .query_row("SELECT boost_value FROM tracks WHERE id = ?1", [id], |row| row.get(0))
            .with_context(|| format!("Failed to read boost of track {id}"))
    }
}

impl Catalog for SqliteCatalog {
    fn fetch_all(&self) -> Result<Vec<TrackCandidate>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks ORDER BY id"))
            .context("Invalid SQL statement when SELECTing tracks")?;

        let tracks = stmt
            .query_map([], track_from_row)
            .context("Cannot query tracks")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read track row")?;

        log::trace!("Fetched {} catalog tracks", tracks.len());
        Ok(tracks)
    }

    fn fetch_by_id(&self, id: TrackId) -> Result<Option<TrackCandidate>> {
        self.conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                [id],
                track_from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query track {id}"))
    }
}

/// In-process catalog. Clones share the same track list, so a test or an
/// embedding application can keep a handle and mutate the catalog while a
/// rotation reads from it.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    tracks: Arc<Mutex<Vec<TrackCandidate>>>,
}

impl MemoryCatalog {
    pub fn new(tracks: Vec<TrackCandidate>) -> Self {
        Self {
            tracks: Arc::new(Mutex::new(tracks)),
        }
    }

    /// Insert a track, replacing any with the same id.
    pub fn insert(&self, track: TrackCandidate) -> Result<()> {
        let mut tracks = self.lock()?;
        tracks.retain(|t| t.id != track.id);
        tracks.push(track);
        Ok(())
    }

    pub fn remove(&self, id: TrackId) -> Result<()> {
        self.lock()?.retain(|t| t.id != id);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<TrackCandidate>>> {
        self.tracks
            .lock()
            .map_err(|_| anyhow::anyhow!("Memory catalog lock poisoned"))
    }
}

impl Catalog for MemoryCatalog {
    fn fetch_all(&self) -> Result<Vec<TrackCandidate>> {
        Ok(self.lock()?.clone())
    }

    fn fetch_by_id(&self, id: TrackId) -> Result<Option<TrackCandidate>> {
        Ok(self.lock()?.iter().find(|t| t.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn track(id: TrackId, artist: &str) -> TrackCandidate {
        TrackCandidate {
            id,
            created_at: 1_700_000_000_000,
            boost_value: 0.0,
            artist_id: artist.to_string(),
            duration_ms: 180_000,
        }
    }

    fn sqlite_catalog() -> SqliteCatalog {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        SqliteCatalog::new(conn)
    }

    #[test]
    fn test_sqlite_catalog_add_fetch_remove() {
        let catalog = sqlite_catalog();
        catalog.add_track(&track(1, "a")).unwrap();
        catalog.add_track(&track(2, "b")).unwrap();

        let all = catalog.fetch_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(catalog.fetch_by_id(2).unwrap(), Some(track(2, "b")));

        assert!(catalog.remove_track(2).unwrap());
        assert!(!catalog.remove_track(2).unwrap());
        assert_eq!(catalog.fetch_by_id(2).unwrap(), None);
    }

    #[test]
    fn test_sqlite_catalog_rejects_bad_duration() {
        let catalog = sqlite_catalog();
        let bad = TrackCandidate { duration_ms: 0, ..track(1, "a") };

        let err = catalog.add_track(&bad).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RotationError>(),
            Some(RotationError::InvalidTrack(_))
        ));
    }

    #[test]
    fn test_boost_accumulates_and_never_decreases() {
        let catalog = sqlite_catalog();
        catalog.add_track(&track(1, "a")).unwrap();

        assert_eq!(catalog.add_boost(1, 0.25).unwrap(), 0.25);
        assert_eq!(catalog.add_boost(1, 0.25).unwrap(), 0.5);
        assert!(catalog.add_boost(1, -0.1).is_err());
        assert_eq!(catalog.fetch_by_id(1).unwrap().unwrap().boost_value, 0.5);

        let missing = catalog.add_boost(9, 1.0).unwrap_err();
        assert_eq!(
            missing.downcast_ref::<RotationError>(),
            Some(&RotationError::TrackNotFound(9))
        );
    }

    #[test]
    fn test_memory_catalog_clones_share_state() {
        let catalog = MemoryCatalog::new(vec![track(1, "a")]);
        let handle = catalog.clone();

        handle.insert(track(2, "b")).unwrap();
        assert_eq!(catalog.fetch_all().unwrap().len(), 2);

        handle.remove(1).unwrap();
        assert_eq!(catalog.fetch_by_id(1).unwrap(), None);

        handle.clear().unwrap();
        assert!(catalog.fetch_all().unwrap().is_empty());
    }

    #[test]
    fn test_memory_catalog_poisoned_lock_fails_writes_and_reads() {
        let catalog = MemoryCatalog::new(vec![track(1, "a")]);
        let shared = catalog.tracks.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("poison the catalog lock");
        })
        .join();

        assert!(catalog.insert(track(2, "b")).is_err());
        assert!(catalog.remove(1).is_err());
        assert!(catalog.clear().is_err());
        assert!(catalog.fetch_all().is_err());
        assert!(catalog.fetch_by_id(1).is_err());
    }
}
