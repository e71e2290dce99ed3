//! Now-playing cache invalidation.
//!
//! Read endpoints in front of the rotation cache "now playing" and the queue
//! preview. After every transition the rotation signals them to refresh.
//! The signal is fire-and-forget: the rotation logs a failed signal and
//! carries on, it never rolls back a transition because of it.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

pub trait CacheInvalidation {
    /// Tell downstream caches that now-playing state changed.
    fn signal(&self) -> Result<()>;
}

/// Does nothing. For embedding without any downstream cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInvalidation;

impl CacheInvalidation for NoopInvalidation {
    fn signal(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes the current time in milliseconds to a marker file. Readers compare
/// the file contents (or its mtime) against what they cached.
#[derive(Debug, Clone)]
pub struct MarkerFileInvalidation {
    path: PathBuf,
}

impl MarkerFileInvalidation {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl CacheInvalidation for MarkerFileInvalidation {
    fn signal(&self) -> Result<()> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);

        // Write-then-rename so a reader never sees a half-written stamp.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, stamp.to_string())
            .with_context(|| format!("Failed to write invalidation marker {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to publish invalidation marker {}", self.path.display()))?;

        log::trace!("Signalled cache invalidation at {stamp}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_marker_file_holds_latest_stamp() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let marker = MarkerFileInvalidation::new(temp_dir.path().join("now_playing.version"));

        marker.signal().unwrap();
        let first: u128 = fs::read_to_string(marker.path()).unwrap().parse().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        marker.signal().unwrap();
        let second: u128 = fs::read_to_string(marker.path()).unwrap().parse().unwrap();

        assert!(second > first);
        assert!(!marker.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_marker_in_missing_directory_fails() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let marker = MarkerFileInvalidation::new(temp_dir.path().join("gone").join("marker"));

        assert!(marker.signal().is_err());
    }
}
