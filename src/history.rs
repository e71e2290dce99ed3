//! # Play History Ledger
//!
//! Append-only log of finished plays, used to build the anti-repeat and
//! artist-diversity exclusions. One row is written per finished play, when
//! the rotation advances past it.
//!
//! Rows are keyed by `(track_id, started_at)`: a retried advance that tries
//! to record the same play again is ignored rather than duplicated.
//!
//! Entries older than the retention window are pruned after each write.
//! Pruning is best-effort, so readers can only rely on the window being
//! covered, not on an exact cutoff.

use crate::catalog::{Millis, TrackId};
use crate::config::SelectionConfig;
use crate::selector::Exclusions;
use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// One finished play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track_id: TrackId,
    pub artist_id: String,
    /// When the play was recorded as finished.
    pub played_at: Millis,
    /// When the play went on air; identifies the play across retries.
    pub started_at: Millis,
}

/// Append a finished play. Returns `false` when the same play was already
/// recorded.
pub fn record_play(conn: &Connection, entry: &HistoryEntry) -> Result<bool> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO play_history (track_id, artist_id, played_at, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            (entry.track_id, &entry.artist_id, entry.played_at, entry.started_at),
        )
        .with_context(|| format!("Failed to record play of track {}", entry.track_id))?;

    if inserted == 0 {
        log::debug!(
            "Play of track {} started at {} already recorded",
            entry.track_id,
            entry.started_at
        );
    }
    Ok(inserted > 0)
}

/// The `limit` most recently played distinct track ids, newest first.
pub fn recent_track_ids(conn: &Connection, limit: usize) -> Result<Vec<TrackId>> {
    let mut stmt = conn.prepare(
        "SELECT track_id FROM play_history
         GROUP BY track_id
         ORDER BY MAX(played_at) DESC, MAX(id) DESC
         LIMIT ?1",
    )?;

    let ids = stmt
        .query_map([limit as i64], |row| row.get(0))
        .context("Cannot query recent track ids")?
        .collect::<rusqlite::Result<Vec<TrackId>>>()?;
    Ok(ids)
}

/// The `limit` most recently played distinct artists, newest first.
pub fn recent_artist_ids(conn: &Connection, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT artist_id FROM play_history
         GROUP BY artist_id
         ORDER BY MAX(played_at) DESC, MAX(id) DESC
         LIMIT ?1",
    )?;

    let ids = stmt
        .query_map([limit as i64], |row| row.get(0))
        .context("Cannot query recent artist ids")?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(ids)
}

/// Exclusion sets derived from the ledger as it stands now.
pub fn exclusions(conn: &Connection, config: &SelectionConfig) -> Result<Exclusions> {
    Ok(Exclusions {
        track_ids: recent_track_ids(conn, config.recent_track_window)?
            .into_iter()
            .collect(),
        artist_ids: recent_artist_ids(conn, config.recent_artist_window)?
            .into_iter()
            .collect(),
    })
}

/// Delete entries played before `cutoff`. Returns how many were removed.
pub fn prune_older_than(conn: &Connection, cutoff: Millis) -> Result<usize> {
    let removed = conn
        .execute("DELETE FROM play_history WHERE played_at < ?1", [cutoff])
        .context("Failed to prune play history")?;
    if removed > 0 {
        log::debug!("Pruned {removed} history entries older than {cutoff}");
    }
    Ok(removed)
}

/// The latest `limit` entries, newest first.
pub fn recent_entries(conn: &Connection, limit: usize) -> Result<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT track_id, artist_id, played_at, started_at FROM play_history
         ORDER BY played_at DESC, id DESC
         LIMIT ?1",
    )?;

    let entries = stmt
        .query_map([limit as i64], |row| {
            Ok(HistoryEntry {
                track_id: row.get(0)?,
                artist_id: row.get(1)?,
                played_at: row.get(2)?,
                started_at: row.get(3)?,
            })
        })
        .context("Cannot query play history")?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}
