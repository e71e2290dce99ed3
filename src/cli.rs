//! # Command-Line Interface Module
//!
//! Clap definitions for the `onair` binary. Every command works against the
//! rotation database; `--db` and `--config` (or `ONAIR_DB` / `ONAIR_CONFIG`)
//! point at a different one than the default in the data directory.
//!
//! ## Commands
//!
//! - `init-db`: create the rotation tables
//! - `add-track`, `remove-track`, `boost`, `tracks`: manage the catalog
//! - `start`: put a track on air and begin the rotation
//! - `state`, `next`, `preview`, `history`: inspect the rotation
//! - `daemon`: run the background process that advances the rotation
//!
//! ## Examples
//!
//! ```bash
//! onair add-track 1 --artist "artist-a" --duration-ms 215000
//! onair start 1
//! onair daemon start
//! onair preview --depth 5
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "onair")]
#[command(about = "On Air: unattended weighted rotation for a single audio stream")]
#[command(version)]
pub struct Args {
    /// Rotation database (defaults to rotation.db in the data directory)
    #[arg(long, global = true, env = "ONAIR_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// JSON file overriding the rotation tuning
    #[arg(long, global = true, env = "ONAIR_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the rotation tables
    ///
    /// Safe to run on an existing database; tables that already exist are
    /// left alone.
    InitDb,

    /// Add a track to the catalog, replacing any track with the same id
    AddTrack {
        /// Track id
        id: i64,

        /// Artist id, used for artist diversity
        #[arg(long)]
        artist: String,

        /// Track length in milliseconds
        #[arg(long)]
        duration_ms: i64,

        /// Initial boost amount
        #[arg(long, default_value = "0")]
        boost: f64,

        /// Creation time in epoch milliseconds (defaults to now)
        #[arg(long)]
        created_at: Option<i64>,
    },

    /// Remove a track from the catalog
    RemoveTrack {
        /// Track id
        id: i64,
    },

    /// Add to a track's accumulated boost
    ///
    /// Boosted tracks are proportionally more likely to be picked.
    Boost {
        /// Track id
        id: i64,

        /// Amount to add
        amount: f64,
    },

    /// List the catalog with current selection weights
    Tracks {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Put a track on air immediately and begin the rotation
    ///
    /// Does nothing if the rotation is already playing with a wake-up armed.
    Start {
        /// Track id to start with
        id: i64,
    },

    /// Show the current queue state
    State {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the pre-selected next track id
    Next,

    /// Simulate the next selections without changing anything
    Preview {
        /// How many tracks to simulate (defaults to the configured depth)
        #[arg(short, long)]
        depth: Option<usize>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recently finished plays, newest first
    History {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Manage the rotation daemon
    ///
    /// The daemon advances the rotation whenever the current track ends.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Generate shell completions
    ///
    /// Usage: onair completion bash > ~/.local/share/bash-completion/completions/onair
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Daemon management actions
#[derive(Subcommand, Debug)]
pub enum DaemonAction {
    /// Start the daemon in the background
    Start,

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,

    /// Run the daemon in the foreground
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_add_track() {
        let args = Args::try_parse_from([
            "onair", "add-track", "4", "--artist", "a", "--duration-ms", "1000", "--boost", "2.5",
        ])
        .unwrap();

        match args.command {
            Command::AddTrack { id, artist, duration_ms, boost, created_at } => {
                assert_eq!(id, 4);
                assert_eq!(artist, "a");
                assert_eq!(duration_ms, 1000);
                assert_eq!(boost, 2.5);
                assert_eq!(created_at, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_db_flag_after_subcommand() {
        let args = Args::try_parse_from(["onair", "state", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_start_requires_track_id() {
        assert!(Args::try_parse_from(["onair", "start"]).is_err());
    }
}
