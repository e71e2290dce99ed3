//! # Rotation Daemon
//!
//! Background process that keeps a rotation on air without anyone watching.
//!
//! The wake-up slot lives in the rotation database, so the daemon only has to
//! poll it: when the armed wake-up is due, it is handed to [`WakeDelivery`],
//! which advances the rotation (retrying on failure) and clears the slot.
//! Between polls the daemon sleeps until the next wake-up or for the idle
//! poll interval, whichever comes first. A CLI `start` in another process
//! arms the slot and the daemon picks it up on its next poll.
//!
//! A PID file next to the rotation database lets `daemon stop` and
//! `daemon status` find the process serving that database. Daemons for
//! different databases never share one.

use crate::queue::Rotation;
use crate::scheduler::{DeliveryOutcome, WakeDelivery};
use anyhow::{bail, Context, Result};
use log::{debug, error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Polls the wake-up slot and delivers due wake-ups.
pub struct RotationDaemon {
    rotation: Rotation,
    delivery: WakeDelivery,
    pid_file: PathBuf,
    idle_poll: Duration,
}

impl RotationDaemon {
    pub fn new(rotation: Rotation, pid_file: PathBuf) -> Self {
        let wake = rotation.config().wake;
        Self {
            rotation,
            delivery: WakeDelivery::new(wake),
            pid_file,
            idle_poll: Duration::from_millis(wake.idle_poll_ms.max(1)),
        }
    }

    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Deliver the armed wake-up if it is due. Returns `None` when there was
    /// nothing to deliver.
    pub fn tick(&mut self) -> Result<Option<DeliveryOutcome>> {
        let Some(due) = self.rotation.scheduled_wake()? else {
            return Ok(None);
        };
        if self.rotation.now_ms() < due {
            return Ok(None);
        }

        debug!("Wake-up due at {due} is ready");
        self.delivery.deliver(&mut self.rotation, due).map(Some)
    }

    /// How long to sleep before the next poll.
    pub fn next_sleep(&self) -> Result<Duration> {
        let until_due = match self.rotation.scheduled_wake()? {
            Some(due) => {
                let remaining = due.saturating_sub(self.rotation.now_ms()).max(0);
                Duration::from_millis(u64::try_from(remaining).unwrap_or(0))
            }
            None => self.idle_poll,
        };
        Ok(until_due.min(self.idle_poll))
    }

    /// Run until the process is terminated.
    ///
    /// Writes the PID file first. Errors from a single poll are logged and
    /// the loop carries on after a short pause.
    pub fn run(&mut self) -> Result<()> {
        let pid = std::process::id();
        fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write PID file {}", self.pid_file.display()))?;
        info!("Rotation daemon started with PID {pid}");

        loop {
            match self.tick() {
                Ok(Some(DeliveryOutcome::Delivered { outcome, attempts })) => {
                    info!("Advanced rotation after {attempts} attempt(s): {outcome:?}");
                }
                Ok(Some(DeliveryOutcome::GaveUp { attempts })) => {
                    error!("Dropped wake-up after {attempts} failed attempts");
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Error in daemon loop: {e:#}");
                    std::thread::sleep(Duration::from_secs(1));
                }
            }

            let pause = self.next_sleep().unwrap_or(self.idle_poll);
            std::thread::sleep(pause);
        }
    }
}

/// PID file for the daemon serving `db_path`: `onair-<db stem>.pid` in the
/// database's directory.
pub fn pid_file_for(db_path: &Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rotation".to_string());
    let name = format!("onair-{stem}.pid");

    match db_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

/// Whether the process named in `pid_file` is alive.
pub fn is_running_at(pid_file: &Path) -> Result<bool> {
    if !pid_file.exists() {
        return Ok(false);
    }

    let pid = read_pid(pid_file)?;

    // Signal 0 only checks that the process exists.
    match Command::new("kill").args(["-0", &pid.to_string()]).status() {
        Ok(status) => Ok(status.success()),
        Err(_) => Ok(false),
    }
}

/// Send SIGTERM to the process named in `pid_file` and remove the file.
pub fn stop_at(pid_file: &Path) -> Result<()> {
    if !pid_file.exists() {
        bail!("Daemon is not running");
    }

    let pid = read_pid(pid_file)?;
    Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status()
        .context("Failed to stop daemon")?;

    fs::remove_file(pid_file)?;

    info!("Daemon stopped (PID: {pid})");
    Ok(())
}

fn read_pid(pid_file: &Path) -> Result<u32> {
    let pid_str = fs::read_to_string(pid_file)?;
    pid_str.trim().parse().context("Invalid PID in daemon file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, Millis, TrackCandidate};
    use crate::config::RotationConfig;
    use crate::queue::AdvanceOutcome;
    use crate::scheduler::{ManualClock, MemoryWakeSlot};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rusqlite::Connection;
    use tempfile::TempDir;

    const T0: Millis = 1_700_000_000_000;

    fn create_test_daemon() -> (RotationDaemon, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let tracks = (1..=6)
            .map(|id| TrackCandidate {
                id,
                created_at: T0,
                boost_value: 0.0,
                artist_id: format!("artist-{id}"),
                duration_ms: 10_000,
            })
            .collect();
        let clock = ManualClock::new(T0);

        let rotation = Rotation::new(
            Connection::open_in_memory().unwrap(),
            Box::new(MemoryCatalog::new(tracks)),
            Box::new(MemoryWakeSlot::new()),
            RotationConfig::default(),
        )
        .unwrap()
        .with_clock(clock.clone())
        .with_rng(StdRng::seed_from_u64(3));

        let daemon = RotationDaemon::new(rotation, temp_dir.path().join("test-daemon.pid"));
        (daemon, clock, temp_dir)
    }

    #[test]
    fn test_tick_without_wake_does_nothing() {
        let (mut daemon, _clock, _temp_dir) = create_test_daemon();

        assert_eq!(daemon.tick().unwrap(), None);
        assert_eq!(
            daemon.next_sleep().unwrap(),
            Duration::from_millis(RotationConfig::default().wake.idle_poll_ms)
        );
    }

    #[test]
    fn test_tick_waits_for_due_time() {
        let (mut daemon, clock, _temp_dir) = create_test_daemon();
        daemon.rotation.start_immediately(1).unwrap();

        clock.advance(9_999);
        assert_eq!(daemon.tick().unwrap(), None);
        assert_eq!(daemon.next_sleep().unwrap(), Duration::from_millis(1));
        assert_eq!(
            daemon.rotation().get_current_state().unwrap().current_track_id,
            Some(1)
        );
    }

    #[test]
    fn test_tick_delivers_due_wake() {
        let (mut daemon, clock, _temp_dir) = create_test_daemon();
        daemon.rotation.start_immediately(1).unwrap();
        let next = daemon.rotation().get_next_track_id().unwrap().unwrap();

        clock.advance(10_000);
        let outcome = daemon.tick().unwrap();

        assert_eq!(
            outcome,
            Some(DeliveryOutcome::Delivered {
                outcome: AdvanceOutcome::Promoted { track_id: next, fallback: false },
                attempts: 1,
            })
        );
        // The new wake-up armed by the advance survives consumption.
        assert_eq!(
            daemon.rotation().scheduled_wake().unwrap(),
            Some(T0 + 20_000)
        );
    }

    #[test]
    fn test_pid_file_follows_database() {
        assert_eq!(
            pid_file_for(Path::new("/srv/a/rotation.db")),
            PathBuf::from("/srv/a/onair-rotation.pid")
        );
        assert_ne!(
            pid_file_for(Path::new("/srv/a/rotation.db")),
            pid_file_for(Path::new("/srv/b/rotation.db"))
        );
        assert_ne!(
            pid_file_for(Path::new("/srv/a/one.db")),
            pid_file_for(Path::new("/srv/a/two.db"))
        );
        assert_eq!(pid_file_for(Path::new("local.db")), PathBuf::from("onair-local.pid"));
    }

    #[test]
    fn test_other_database_daemon_is_not_seen() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_a = temp_dir.path().join("a.db");
        let db_b = temp_dir.path().join("b.db");
        fs::write(pid_file_for(&db_a), std::process::id().to_string()).unwrap();

        assert!(is_running_at(&pid_file_for(&db_a)).unwrap());
        assert!(!is_running_at(&pid_file_for(&db_b)).unwrap());
    }

    #[test]
    fn test_missing_pid_file_means_not_running() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        assert!(!is_running_at(&temp_dir.path().join("none.pid")).unwrap());
    }

    #[test]
    fn test_own_pid_is_running() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let pid_file = temp_dir.path().join("self.pid");
        fs::write(&pid_file, std::process::id().to_string()).unwrap();

        assert!(is_running_at(&pid_file).unwrap());
    }

    #[test]
    fn test_garbage_pid_file_is_an_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let pid_file = temp_dir.path().join("bad.pid");
        fs::write(&pid_file, "not a pid").unwrap();

        assert!(is_running_at(&pid_file).is_err());
    }

    #[test]
    fn test_stop_without_pid_file_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let err = stop_at(&temp_dir.path().join("none.pid")).unwrap_err();
        assert!(err.to_string().contains("not running"));
    }
}
