//! # On Air - Unattended Stream Rotation
//!
//! Keeps a single audio stream playing forever: when a track ends, the next
//! one is picked by a recency-decayed, boost-weighted random draw that
//! avoids recent tracks and artists.
//!
//! ## Usage
//!
//! ```bash
//! # Build a catalog
//! onair init-db
//! onair add-track 1 --artist a --duration-ms 215000
//! onair add-track 2 --artist b --duration-ms 187000
//!
//! # Go on air and keep advancing in the background
//! onair start 1
//! onair daemon start
//!
//! # Look around
//! onair state
//! onair preview --depth 5
//! ```
//!
//! Logging is controlled via `RUST_LOG`, e.g. `RUST_LOG=onair=debug onair daemon run`.

use anyhow::Result;
use clap::{CommandFactory, Parser};
use log::info;
use onair::catalog::{Catalog, SqliteCatalog, TrackCandidate};
use onair::cli::{self, Command, DaemonAction};
use onair::config::{self, RotationConfig};
use onair::daemon::{self, RotationDaemon};
use onair::error::RotationError;
use onair::invalidation::MarkerFileInvalidation;
use onair::queue::{QueueState, Rotation, StartOutcome};
use onair::scheduler::{Clock, SystemClock};
use onair::{algorithm, completion, db};
use std::path::{Path, PathBuf};

const MARKER_FILE_NAME: &str = "now_playing.version";

/// Where the rotation lives for this invocation.
struct Paths {
    db: PathBuf,
    config: PathBuf,
}

impl Paths {
    fn resolve(args: &cli::Args) -> Result<Self> {
        let db = match &args.db {
            Some(path) => path.clone(),
            None => config::get_db_path()?,
        };
        let config = match &args.config {
            Some(path) => path.clone(),
            None => config::get_config_path()?,
        };
        Ok(Self { db, config })
    }

    /// The invalidation marker sits next to the database.
    fn marker(&self) -> PathBuf {
        match self.db.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(MARKER_FILE_NAME),
            _ => PathBuf::from(MARKER_FILE_NAME),
        }
    }
}

fn open_rotation(paths: &Paths, config: RotationConfig) -> Result<Rotation> {
    Ok(Rotation::open(&paths.db, config)?
        .with_invalidation(MarkerFileInvalidation::new(paths.marker())))
}

fn open_catalog(db_path: &Path) -> Result<SqliteCatalog> {
    let conn = db::connect(db_path)?;
    db::init_schema(&conn)?;
    Ok(SqliteCatalog::new(conn))
}

fn print_state(state: &QueueState) {
    match (state.current_track_id, state.current_started_at, state.current_ends_at) {
        (Some(id), Some(started), Some(ends)) => {
            println!("On air:  track {id}");
            println!("Started: {started}");
            println!("Ends:    {ends}");
        }
        _ => println!("Waiting (nothing on air)"),
    }
    match state.next_track_id {
        Some(id) => println!("Next:    track {id}"),
        None => println!("Next:    none"),
    }
}

fn print_tracks(tracks: &[TrackCandidate], config: &RotationConfig, now: i64) {
    println!("{:>8}  {:<20} {:>10} {:>8} {:>8}", "ID", "ARTIST", "DURATION", "BOOST", "WEIGHT");
    for track in tracks {
        let weight = algorithm::candidate_weight(track, now, &config.weights);
        println!(
            "{:>8}  {:<20} {:>10} {:>8.2} {:>8.4}",
            track.id, track.artist_id, track.duration_ms, track.boost_value, weight
        );
    }
}

fn run_daemon(paths: &Paths, config: RotationConfig) -> Result<()> {
    let rotation = open_rotation(paths, config)?;
    let mut daemon = RotationDaemon::new(rotation, daemon::pid_file_for(&paths.db));
    daemon.run()
}

fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let paths = Paths::resolve(&args)?;
    let config = config::load_config(&paths.config)?;

    match args.command {
        Command::InitDb => {
            let conn = db::connect(&paths.db)?;
            db::init_schema(&conn)?;
            println!("Rotation database ready at {}", paths.db.display());
        }
        Command::AddTrack { id, artist, duration_ms, boost, created_at } => {
            let catalog = open_catalog(&paths.db)?;
            let track = TrackCandidate {
                id,
                created_at: created_at.unwrap_or_else(|| SystemClock.now_ms()),
                boost_value: boost,
                artist_id: artist,
                duration_ms,
            };
            catalog.add_track(&track)?;
            println!("Added track {id}");
        }
        Command::RemoveTrack { id } => {
            if !open_catalog(&paths.db)?.remove_track(id)? {
                return Err(RotationError::TrackNotFound(id).into());
            }
            println!("Removed track {id}");
        }
        Command::Boost { id, amount } => {
            let total = open_catalog(&paths.db)?.add_boost(id, amount)?;
            println!("Track {id} boost is now {total:.2}");
        }
        Command::Tracks { json } => {
            let tracks = open_catalog(&paths.db)?.fetch_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tracks)?);
            } else if tracks.is_empty() {
                println!("Catalog is empty");
            } else {
                print_tracks(&tracks, &config, SystemClock.now_ms());
            }
        }
        Command::Start { id } => {
            info!("Starting rotation with track {id}");
            let mut rotation = open_rotation(&paths, config)?;
            match rotation.start_immediately(id)? {
                StartOutcome::Started(state) => {
                    println!("Rotation started");
                    print_state(&state);
                }
                StartOutcome::AlreadyStarted(state) => {
                    println!("Rotation already started");
                    print_state(&state);
                }
            }
        }
        Command::State { json } => {
            let state = open_rotation(&paths, config)?.get_current_state()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&state);
            }
        }
        Command::Next => match open_rotation(&paths, config)?.get_next_track_id()? {
            Some(id) => println!("{id}"),
            None => println!("none"),
        },
        Command::Preview { depth, json } => {
            let depth = depth.unwrap_or(config.preview_depth);
            let preview = open_rotation(&paths, config)?.get_queue_preview(depth)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&preview)?);
            } else {
                for (position, track) in preview.iter().enumerate() {
                    println!("{:>3}. track {} ({})", position + 1, track.id, track.artist_id);
                }
            }
        }
        Command::History { limit } => {
            let entries = open_rotation(&paths, config)?.history(limit)?;
            for entry in entries {
                println!(
                    "{}  track {} ({}) started {}",
                    entry.played_at, entry.track_id, entry.artist_id, entry.started_at
                );
            }
        }
        Command::Daemon { action } => match action {
            DaemonAction::Start => {
                if daemon::is_running_at(&daemon::pid_file_for(&paths.db))? {
                    eprintln!("Daemon is already running");
                    return Ok(());
                }

                // Fork and start daemon in background
                match unsafe { libc::fork() } {
                    0 => {
                        if let Err(e) = run_daemon(&paths, config) {
                            log::error!("Daemon exited: {e:#}");
                            std::process::exit(1);
                        }
                        std::process::exit(0);
                    }
                    pid if pid > 0 => {
                        println!("Starting rotation daemon...");
                        std::thread::sleep(std::time::Duration::from_millis(500));

                        if daemon::is_running_at(&daemon::pid_file_for(&paths.db))? {
                            println!("Daemon started successfully");
                        } else {
                            eprintln!("Failed to start daemon");
                        }
                    }
                    _ => {
                        eprintln!("Failed to fork process");
                    }
                }
            }
            DaemonAction::Stop => {
                daemon::stop_at(&daemon::pid_file_for(&paths.db))?;
                println!("Daemon stopped");
            }
            DaemonAction::Status => {
                if daemon::is_running_at(&daemon::pid_file_for(&paths.db))? {
                    println!("Daemon is running");
                } else {
                    println!("Daemon is not running");
                }
            }
            DaemonAction::Run => run_daemon(&paths, config)?,
        },
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
    }

    Ok(())
}
