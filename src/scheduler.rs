//! # Wake-up Scheduling
//!
//! The rotation advances when a durable alarm fires at the end of the
//! current track. This module holds the pieces around that alarm:
//!
//! - [`WakeScheduler`]: a single-slot "wake me at T" store. Setting the slot
//!   overwrites any pending wake-up; there is never more than one.
//! - [`SqliteWakeSlot`]: the slot persisted in the rotation database, so a
//!   pending wake-up survives a restart.
//! - [`MemoryWakeSlot`]: the in-process equivalent.
//! - [`Clock`]: the time source, swappable for a [`ManualClock`] in tests.
//! - [`WakeDelivery`]: at-least-once delivery of one due wake-up with a
//!   bounded number of attempts and capped exponential backoff.

use crate::catalog::Millis;
use crate::config::WakeConfig;
use crate::queue::{AdvanceOutcome, Rotation};
use anyhow::{Context, Result};
use log::{error, info, warn};
use rusqlite::{Connection, OptionalExtension};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Durable single-slot alarm.
pub trait WakeScheduler {
    /// Arm the slot for `at`, replacing whatever was pending.
    fn set_wake_at(&mut self, at: Millis) -> Result<()>;

    /// The pending wake-up, if any.
    fn scheduled_wake(&self) -> Result<Option<Millis>>;

    /// Empty the slot once its wake-up has been consumed.
    fn clear_wake(&mut self) -> Result<()>;
}

/// Wake slot stored in the `wake_alarm` table.
pub struct SqliteWakeSlot {
    conn: Connection,
}

impl SqliteWakeSlot {
    /// Wrap a connection whose schema has already been initialized.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl WakeScheduler for SqliteWakeSlot {
    fn set_wake_at(&mut self, at: Millis) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO wake_alarm (slot, wake_at) VALUES (0, ?1)
                 ON CONFLICT(slot) DO UPDATE SET wake_at = excluded.wake_at",
                [at],
            )
            .with_context(|| format!("Failed to arm wake-up for {at}"))?;
        Ok(())
    }

    fn scheduled_wake(&self) -> Result<Option<Millis>> {
        self.conn
            .query_row("SELECT wake_at FROM wake_alarm WHERE slot = 0", [], |row| row.get(0))
            .optional()
            .context("Failed to read wake-up slot")
    }

    fn clear_wake(&mut self) -> Result<()> {
        self.conn
            .execute("DELETE FROM wake_alarm WHERE slot = 0", [])
            .context("Failed to clear wake-up slot")?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemorySlot {
    wake_at: Option<Millis>,
    sets: usize,
}

/// In-process wake slot. Clones share the slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryWakeSlot {
    inner: Arc<Mutex<MemorySlot>>,
}

impl MemoryWakeSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the slot has been armed.
    pub fn set_count(&self) -> usize {
        self.inner.lock().map(|slot| slot.sets).unwrap_or(0)
    }

    fn slot(&self) -> Result<std::sync::MutexGuard<'_, MemorySlot>> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("Wake slot lock poisoned"))
    }
}

impl WakeScheduler for MemoryWakeSlot {
    fn set_wake_at(&mut self, at: Millis) -> Result<()> {
        let mut slot = self.slot()?;
        slot.wake_at = Some(at);
        slot.sets += 1;
        Ok(())
    }

    fn scheduled_wake(&self) -> Result<Option<Millis>> {
        Ok(self.slot()?.wake_at)
    }

    fn clear_wake(&mut self) -> Result<()> {
        self.slot()?.wake_at = None;
        Ok(())
    }
}

/// Source of "now" in milliseconds since the Unix epoch.
pub trait Clock {
    fn now_ms(&self) -> Millis;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as Millis)
            .unwrap_or(0)
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start)),
        }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by_ms: i64) {
        self.now.fetch_add(by_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Result of delivering one wake-up.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// `advance` succeeded on the given attempt.
    Delivered { outcome: AdvanceOutcome, attempts: u32 },
    /// Every attempt failed; the wake-up was dropped.
    GaveUp { attempts: u32 },
}

/// Delivers a due wake-up to [`Rotation::advance`].
///
/// A failing `advance` is re-invoked from scratch, up to
/// `WakeConfig::max_attempts` times in total. Once delivery finishes either
/// way, the consumed wake-up is cleared from the slot, unless `advance`
/// already armed a new one.
#[derive(Debug, Clone)]
pub struct WakeDelivery {
    config: WakeConfig,
}

impl WakeDelivery {
    pub fn new(config: WakeConfig) -> Self {
        Self { config }
    }

    /// Backoff before attempt `attempt + 1`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(20);
        let delay = self.config.retry_base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.config.retry_max_delay_ms))
    }

    /// Deliver the wake-up that was due at `due`.
    ///
    /// # Errors
    ///
    /// Only fails when the wake slot itself cannot be read or cleared;
    /// failures of `advance` are retried and reported through
    /// [`DeliveryOutcome::GaveUp`].
    pub fn deliver(&self, rotation: &mut Rotation, due: Millis) -> Result<DeliveryOutcome> {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match rotation.advance() {
                Ok(outcome) => {
                    rotation.consume_wake(due)?;
                    info!("Delivered wake-up due at {due} on attempt {attempt}: {outcome:?}");
                    return Ok(DeliveryOutcome::Delivered { outcome, attempts: attempt });
                }
                Err(err) => {
                    warn!("Wake-up due at {due} failed (attempt {attempt}/{max_attempts}): {err:#}");
                    if attempt < max_attempts {
                        std::thread::sleep(self.backoff(attempt));
                    }
                }
            }
        }

        error!("Giving up on wake-up due at {due} after {max_attempts} attempts");
        rotation.consume_wake(due)?;
        Ok(DeliveryOutcome::GaveUp { attempts: max_attempts })
    }
}
