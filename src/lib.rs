//! Unattended rotation scheduler for a single audio stream.
//!
//! Core modules:
//! - [`queue`] - The rotation state machine (start, advance, preview)
//! - [`selector`] - Weighted random pick with anti-repeat and artist diversity
//! - [`algorithm`] - Recency decay and boost weighting
//! - [`history`] - Ledger of finished plays
//! - [`scheduler`] - Durable wake-up slot, clock and wake-up delivery
//! - [`daemon`] - Background process that delivers due wake-ups
//!
//! ### Supporting Modules
//!
//! - [`catalog`] - Track candidates and catalog stores
//! - [`db`] - SQLite schema and queue-state persistence
//! - [`invalidation`] - Now-playing cache invalidation signal
//! - [`config`] - Tuning and data directory management
//! - [`error`] - Domain errors callers match on
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use onair::catalog::{SqliteCatalog, TrackCandidate};
//! use onair::config::RotationConfig;
//! use onair::queue::Rotation;
//! use onair::db;
//!
//! # fn main() -> anyhow::Result<()> {
//! let db_path = onair::config::get_db_path()?;
//!
//! let conn = db::connect(&db_path)?;
//! db::init_schema(&conn)?;
//! let catalog = SqliteCatalog::new(conn);
//! catalog.add_track(&TrackCandidate {
//!     id: 1,
//!     created_at: 1_700_000_000_000,
//!     boost_value: 0.0,
//!     artist_id: "artist-a".to_string(),
//!     duration_ms: 215_000,
//! })?;
//!
//! let mut rotation = Rotation::open(&db_path, RotationConfig::default())?;
//! rotation.start_immediately(1)?;
//!
//! for track in rotation.get_queue_preview(5)? {
//!     println!("coming up: {} by {}", track.id, track.artist_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod history;
pub mod invalidation;
pub mod queue;
pub mod scheduler;
pub mod selector;
