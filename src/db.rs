//! # Database Module
//!
//! SQLite persistence for the rotation. One database file holds:
//!
//! - `queue_state`: key/value rows for the four queue-state fields
//! - `play_history`: append-only ledger of finished plays (see [`crate::history`])
//! - `wake_alarm`: the single durable wake-up slot (see [`crate::scheduler`])
//! - `tracks`: the catalog read by [`crate::catalog::SqliteCatalog`]
//!
//! Queue-state values are stored as text. A cleared field is SQL `NULL`, never
//! an empty string.

use crate::error::RotationError;
use crate::queue::QueueState;
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

const KEY_CURRENT_TRACK: &str = "current_track_id";
const KEY_CURRENT_STARTED: &str = "current_started_at";
const KEY_CURRENT_ENDS: &str = "current_ends_at";
const KEY_NEXT_TRACK: &str = "next_track_id";

/// Open a connection to the rotation database.
///
/// The daemon and CLI invocations share the file, so a busy timeout is set
/// instead of failing on a momentary lock.
pub fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", db_path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set SQLite busy timeout")?;
    Ok(conn)
}

/// Create all tables and indexes if they do not exist yet. Safe to call on
/// every startup.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS queue_state (
            key   TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS play_history (
            id         INTEGER PRIMARY KEY,
            track_id   INTEGER NOT NULL,
            artist_id  TEXT    NOT NULL,
            played_at  INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            UNIQUE (track_id, started_at)
        );
        CREATE INDEX IF NOT EXISTS idx_play_history_played_at
            ON play_history (played_at DESC);

        CREATE TABLE IF NOT EXISTS wake_alarm (
            slot    INTEGER PRIMARY KEY CHECK (slot = 0),
            wake_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tracks (
            id          INTEGER PRIMARY KEY,
            created_at  INTEGER NOT NULL,
            boost_value REAL    NOT NULL DEFAULT 0,
            artist_id   TEXT    NOT NULL,
            duration_ms INTEGER NOT NULL
        );",
    )
    .context("Invalid SQL command when CREATEing rotation tables")?;

    log::debug!("Rotation schema ready");
    Ok(())
}

fn read_key(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value: Option<Option<String>> = conn
        .query_row("SELECT value FROM queue_state WHERE key = ?1", [key], |row| row.get(0))
        .optional()
        .with_context(|| format!("Failed to read queue state key `{key}`"))?;

    match value.flatten() {
        None => Ok(None),
        Some(text) => text
            .parse::<i64>()
            .map(Some)
            .with_context(|| format!("Queue state key `{key}` holds non-numeric value `{text}`")),
    }
}

/// Load the persisted queue state. A fresh database reads as the waiting
/// state; nothing is written until the first transition.
pub fn load_state(conn: &Connection) -> Result<QueueState> {
    Ok(QueueState {
        current_track_id: read_key(conn, KEY_CURRENT_TRACK)?,
        current_started_at: read_key(conn, KEY_CURRENT_STARTED)?,
        current_ends_at: read_key(conn, KEY_CURRENT_ENDS)?,
        next_track_id: read_key(conn, KEY_NEXT_TRACK)?,
    })
}

/// Write all four queue-state fields in one transaction.
///
/// # Errors
///
/// Refuses a state that breaks the null-together invariant with
/// [`RotationError::InconsistentState`].
pub fn save_state(conn: &mut Connection, state: &QueueState) -> Result<()> {
    if !state.is_consistent() {
        return Err(RotationError::InconsistentState(format!("{state:?}")).into());
    }

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO queue_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;

        for (key, value) in [
            (KEY_CURRENT_TRACK, state.current_track_id),
            (KEY_CURRENT_STARTED, state.current_started_at),
            (KEY_CURRENT_ENDS, state.current_ends_at),
            (KEY_NEXT_TRACK, state.next_track_id),
        ] {
            stmt.execute((key, value.map(|v| v.to_string())))
                .with_context(|| format!("Failed to write queue state key `{key}`"))?;
        }
    }
    tx.commit().context("Commiting queue state transaction failed")?;

    log::trace!("Saved queue state {state:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_reads_as_waiting() {
        let conn = memory_db();
        let state = load_state(&conn).unwrap();

        assert!(state.is_waiting());
        assert_eq!(state, QueueState::default());
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = memory_db();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_save_and_load_state() {
        let mut conn = memory_db();
        let state = QueueState {
            current_track_id: Some(7),
            current_started_at: Some(1_000),
            current_ends_at: Some(181_000),
            next_track_id: Some(3),
        };

        save_state(&mut conn, &state).unwrap();
        assert_eq!(load_state(&conn).unwrap(), state);

        save_state(&mut conn, &QueueState::default()).unwrap();
        assert!(load_state(&conn).unwrap().is_waiting());
    }

    #[test]
    fn test_cleared_fields_are_null_not_empty() {
        let mut conn = memory_db();
        save_state(&mut conn, &QueueState::default()).unwrap();

        let empty_strings: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_state WHERE value = ''", [], |row| row.get(0))
            .unwrap();
        let nulls: i64 = conn
            .query_row("SELECT COUNT(*) FROM queue_state WHERE value IS NULL", [], |row| row.get(0))
            .unwrap();

        assert_eq!(empty_strings, 0);
        assert_eq!(nulls, 4);
    }

    #[test]
    fn test_inconsistent_state_is_refused() {
        let mut conn = memory_db();
        let mixed = QueueState {
            current_track_id: Some(1),
            current_started_at: None,
            current_ends_at: Some(10),
            next_track_id: None,
        };

        let err = save_state(&mut conn, &mixed).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RotationError>(),
            Some(RotationError::InconsistentState(_))
        ));
        assert!(load_state(&conn).unwrap().is_waiting());
    }
}
