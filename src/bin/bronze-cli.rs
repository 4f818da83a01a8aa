//! bronze-store CLI
//!
//! Inspect and maintain a bronze data directory from the shell.
//! Structured results are printed to stdout as JSON; logs go to stderr.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use bronze_store::{
    BronzeError, BronzeStore, CompressionStatus, Config, EntityId, EntryStatus, HealthStatus,
    Outcome, RecordDate, Source,
};

/// bronze-store CLI
#[derive(Parser, Debug)]
#[command(name = "bronze-cli")]
#[command(about = "Raw record store with manifests and verified archives")]
#[command(version)]
struct Args {
    /// Data directory (root for all sources)
    #[arg(short, long, default_value = "./bronze_data", global = true)]
    data_dir: PathBuf,

    /// Manifest / archive lock timeout in milliseconds
    #[arg(long, default_value = "30000", global = true)]
    lock_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a payload from a file
    Put {
        source: Source,
        date: RecordDate,
        id: EntityId,
        file: PathBuf,
    },

    /// Print a record's payload
    Get {
        source: Source,
        date: RecordDate,
        id: EntityId,
    },

    /// Check whether a record is stored in any tier
    Exists {
        source: Source,
        date: RecordDate,
        id: EntityId,
    },

    /// Record a capture outcome in the manifest
    Mark {
        source: Source,
        date: RecordDate,
        id: EntityId,
        /// pending | captured | failed
        status: EntryStatus,
        /// Error message for failed outcomes
        #[arg(long)]
        error: Option<String>,
    },

    /// Register ids found by discovery as expected
    Expect {
        source: Source,
        date: RecordDate,
        #[arg(required = true)]
        ids: Vec<EntityId>,
    },

    /// Mark a named phase complete (or incomplete)
    Phase {
        source: Source,
        date: RecordDate,
        phase: String,
        #[arg(long)]
        incomplete: bool,
    },

    /// Show the manifest of a date
    Manifest { source: Source, date: RecordDate },

    /// Archive one date
    Compress {
        source: Source,
        date: RecordDate,
        /// Rebuild an existing archive
        #[arg(long)]
        force: bool,
        /// Keep loose files after a verified archive
        #[arg(long)]
        keep_sources: bool,
    },

    /// Archive every date of a source
    CompressAll {
        source: Source,
        #[arg(long)]
        force: bool,
    },

    /// List the dates stored for a source
    Dates { source: Source },

    /// List the entities stored for a date
    Entities { source: Source, date: RecordDate },

    /// Reconcile a manifest with the files on disk
    Rebuild { source: Source, date: RecordDate },

    /// Pre-flight checks: disk space, permissions, directories, locks
    Health,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bronze_store=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .lock_timeout_ms(args.lock_timeout_ms)
        .build();

    let store = match BronzeStore::open(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    match run(&store, args.command) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(if e.is_validation() { 2 } else { 1 });
        }
    }
}

/// Execute one command; returns the process exit code
fn run(store: &BronzeStore, command: Commands) -> bronze_store::Result<i32> {
    match command {
        Commands::Put {
            source,
            date,
            id,
            file,
        } => {
            let payload = std::fs::read(&file).map_err(|e| BronzeError::read(&file, e))?;
            print_json(&store.put(&source, &date, &id, &payload)?)?;
        }

        Commands::Get { source, date, id } => match store.get(&source, &date, &id)? {
            Some(payload) => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&payload)?;
                stdout.flush()?;
            }
            None => {
                tracing::warn!("{}/{}/{} not found", source, date, id);
                return Ok(1);
            }
        },

        Commands::Exists { source, date, id } => {
            let found = store.exists(&source, &date, &id)?;
            print_json(&found)?;
            return Ok(if found { 0 } else { 1 });
        }

        Commands::Mark {
            source,
            date,
            id,
            status,
            error,
        } => {
            let outcome = Outcome {
                error,
                ..Outcome::new(id, status)
            };
            print_json(&store.mark_batch(&source, &date, &[outcome])?)?;
        }

        Commands::Expect { source, date, ids } => {
            print_json(&store.register_expected(&source, &date, &ids)?)?;
        }

        Commands::Phase {
            source,
            date,
            phase,
            incomplete,
        } => {
            print_json(&store.mark_phase(&source, &date, &phase, !incomplete)?)?;
        }

        Commands::Manifest { source, date } => {
            print_json(&store.get_manifest(&source, &date)?)?;
        }

        Commands::Compress {
            source,
            date,
            force,
            keep_sources,
        } => {
            let result = store.compress_with(&source, &date, force, !keep_sources);
            print_json(&result)?;
            if result.status == CompressionStatus::Error {
                return Ok(1);
            }
        }

        Commands::CompressAll { source, force } => {
            let dates = store.list_dates(&source)?;
            let results = store.compress_dates(&source, &dates, force);
            let failed = results
                .iter()
                .filter(|(_, r)| r.status == CompressionStatus::Error)
                .count();
            let report: Vec<DateResult> = results
                .into_iter()
                .map(|(date, result)| DateResult {
                    date: date.compact(),
                    result,
                })
                .collect();
            print_json(&report)?;
            if failed > 0 {
                tracing::error!("{} date(s) failed to compress", failed);
                return Ok(1);
            }
        }

        Commands::Dates { source } => {
            let dates: Vec<String> = store
                .list_dates(&source)?
                .iter()
                .map(RecordDate::compact)
                .collect();
            print_json(&dates)?;
        }

        Commands::Entities { source, date } => {
            print_json(&store.list_entities(&source, &date)?)?;
        }

        Commands::Rebuild { source, date } => {
            print_json(&store.rebuild_manifest(&source, &date)?)?;
        }

        Commands::Health => {
            let report = store.health_check();
            print_json(&report)?;
            if report.status == HealthStatus::Unhealthy {
                return Ok(1);
            }
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct DateResult {
    date: String,
    #[serde(flatten)]
    result: bronze_store::CompressionResult,
}

fn print_json<T: Serialize>(value: &T) -> bronze_store::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| BronzeError::Serialization(e.to_string()))?;
    println!("{}", json);
    Ok(())
}
