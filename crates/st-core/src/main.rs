//! steptrace CLI entry point.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use st_common::{Error, Result, SessionId, SCHEMA_VERSION};
use st_config::{
    resolve_config, validate, ConfigPaths, ConfigSnapshot, ConfigSource, MemoryRegion,
    MonitorConfig, RecorderConfig,
};
use st_core::logging::{init_logging, LogFormat};
use st_core::monitor::{self, CrossCheck};
use st_core::remote::{self, RemoteTarget};
use st_core::{CancelFlag, ExitCode, MemoryReader, Recorder, RecorderState};
use st_store::SnapshotStore;
use tracing::{debug, info, warn};

/// Instruction-level execution recorder and memory snapshot database.
#[derive(Parser, Debug)]
#[command(name = "steptrace", version, about)]
struct Cli {
    /// Recorder configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Snapshot database path, overriding the configuration
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log line format (logs go to stderr)
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the snapshot database
    InitDb,
    /// Record a session by single-stepping the remote target
    Record(RecordArgs),
    /// List recorded sessions, newest first
    Sessions,
    /// List sessions that were never closed
    Unclosed,
    /// Per-phase instruction counts of a session
    Timeline { session: String },
    /// Pattern match history of one region
    Evolution { session: String, region: String },
    /// Captures of one region and what changed between them
    Compare { session: String, region: String },
    /// Instruction counts per resolved function
    Functions { session: String },
    /// Snapshot metadata of a session
    Snapshots { session: String },
    /// Delete a session with its traces and snapshots
    Delete { session: String },
    /// Cross-check debug stub reads against the VM monitor
    MonitorCheck(MonitorCheckArgs),
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Debug stub address (host:port)
    #[arg(long)]
    target: Option<String>,

    #[arg(long)]
    max_instructions: Option<u64>,

    #[arg(long)]
    snapshot_interval: Option<u64>,

    /// Free-text note stored on the session
    #[arg(long)]
    description: Option<String>,
}

#[derive(Args, Debug)]
struct MonitorCheckArgs {
    /// Debug stub address (host:port)
    #[arg(long)]
    target: Option<String>,

    /// Monitor address (host:port)
    #[arg(long)]
    monitor: Option<String>,

    /// Only check this region
    #[arg(long)]
    region: Option<String>,
}

#[derive(Serialize)]
struct ErrorOutput<'a> {
    code: u32,
    family: &'a str,
    message: String,
}

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    schema_version: &'static str,
    config_source: ConfigSource,
}

#[derive(Serialize)]
struct MonitorReport {
    checks: Vec<CrossCheck>,
    monitor_registers: std::collections::BTreeMap<String, u32>,
    stub_pc: Option<u32>,
    consistent: bool,
}

#[derive(Serialize)]
struct DeleteOutput {
    session_id: SessionId,
    deleted: bool,
}

static CANCEL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn handle_sigint(_signal: libc::c_int) {
    if let Some(flag) = CANCEL_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Route SIGINT to the recorder's cancel flag so the session gets closed.
#[cfg(unix)]
fn install_sigint(cancel: &CancelFlag) {
    let _ = CANCEL_FLAG.set(cancel.handle());
    // SAFETY: the handler only performs an atomic store.
    unsafe {
        libc::signal(
            libc::SIGINT,
            handle_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
fn install_sigint(cancel: &CancelFlag) {
    let _ = CANCEL_FLAG.set(cancel.handle());
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            let code = ExitCode::for_error(&err);
            let output = ErrorOutput {
                code: err.code(),
                family: err.family(),
                message: err.to_string(),
            };
            match serde_json::to_string_pretty(&output) {
                Ok(json) => println!("{json}"),
                Err(_) => eprintln!("error: {err}"),
            }
            code
        }
    };
    process::exit(code.as_i32());
}

fn run(cli: Cli) -> Result<ExitCode> {
    let (config, source) = load_config(&cli)?;

    match cli.command {
        Command::InitDb => {
            open_store(&config)?;
            emit(&InitOutput {
                database: config.database.clone(),
                schema_version: SCHEMA_VERSION,
                config_source: source,
            })
        }
        Command::Record(args) => record(config, args),
        Command::Sessions => emit(&open_store(&config)?.list_sessions()?),
        Command::Unclosed => {
            let unclosed = open_store(&config)?.unclosed_sessions()?;
            if !unclosed.is_empty() {
                warn!(count = unclosed.len(), "sessions left open");
            }
            emit(&unclosed)
        }
        Command::Timeline { session } => {
            let store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            emit(&store.query_phase_timeline(&id)?)
        }
        Command::Evolution { session, region } => {
            let store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            emit(&store.query_pattern_evolution(&id, &region)?)
        }
        Command::Compare { session, region } => {
            let store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            emit(&store.compare_region(&id, &region)?)
        }
        Command::Functions { session } => {
            let store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            emit(&store.query_function_stats(&id)?)
        }
        Command::Snapshots { session } => {
            let store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            emit(&store.list_snapshots(&id)?)
        }
        Command::Delete { session } => {
            let mut store = open_store(&config)?;
            let id = require_session(&store, &session)?;
            let deleted = store.delete_session(&id)?;
            emit(&DeleteOutput {
                session_id: id,
                deleted,
            })
        }
        Command::MonitorCheck(args) => monitor_check(config, args),
    }
}

fn load_config(cli: &Cli) -> Result<(RecorderConfig, ConfigSource)> {
    let (mut config, source) = resolve_config(&ConfigPaths::discover(cli.config.clone()))?;
    debug!(source = ?source, "configuration resolved");
    for warning in validate(&config).warnings {
        warn!(%warning, "configuration warning");
    }
    if let Some(db) = &cli.db {
        config.database = db.clone();
    }
    Ok((config, source))
}

fn open_store(config: &RecorderConfig) -> Result<SnapshotStore> {
    Ok(SnapshotStore::open(&config.database)?)
}

fn require_session(store: &SnapshotStore, raw: &str) -> Result<SessionId> {
    let id = SessionId(raw.to_string());
    match store.get_session(&id)? {
        Some(_) => Ok(id),
        None => Err(Error::SessionNotFound {
            session_id: raw.to_string(),
        }),
    }
}

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(ExitCode::Clean)
}

fn record(mut config: RecorderConfig, args: RecordArgs) -> Result<ExitCode> {
    if let Some(target) = args.target {
        config.target.address = target;
    }
    if let Some(max) = args.max_instructions {
        config.recording.max_instructions = max;
    }
    if let Some(interval) = args.snapshot_interval {
        config.recording.snapshot_interval = interval;
    }
    config.check()?;

    let cancel = CancelFlag::new();
    install_sigint(&cancel);

    let snapshot = ConfigSnapshot::capture(&config)?;
    let mut store = open_store(&config)?;
    info!(
        stub = %config.target.address,
        database = %config.database.display(),
        config_hash = %snapshot.config_hash,
        "connecting to debug stub"
    );
    let client = remote::connect(&config.target)?;

    let mut recorder = Recorder::new(client, &mut store, &config, cancel);
    let report = recorder.run(args.description.as_deref(), Some(&snapshot.config_hash))?;
    emit(&report)?;

    Ok(match report.state {
        RecorderState::Completed => ExitCode::Clean,
        RecorderState::Cancelled => ExitCode::Interrupted,
        _ => ExitCode::RecordingFailed,
    })
}

fn monitor_check(mut config: RecorderConfig, args: MonitorCheckArgs) -> Result<ExitCode> {
    if let Some(target) = args.target {
        config.target.address = target;
    }
    let mut monitor_config = config.monitor.clone().unwrap_or_else(MonitorConfig::default);
    if let Some(address) = args.monitor {
        monitor_config.address = address;
    }

    let regions: Vec<MemoryRegion> = match &args.region {
        Some(name) => vec![config
            .region(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown region '{name}'")))?],
        None => config.regions.clone(),
    };

    let mut client = remote::connect(&config.target)?;
    let mut monitor = monitor::connect(&monitor_config)?;
    let reader = MemoryReader::new(regions.clone());

    let mut checks = Vec::with_capacity(regions.len());
    for region in &regions {
        let bytes = reader.read_range(&mut client, region.base, region.size);
        let check = monitor.cross_validate(region, &bytes)?;
        if !check.consistent {
            warn!(
                region = %check.region,
                mismatching_words = check.mismatching_words,
                incomplete = check.incomplete,
                "debug stub and monitor disagree"
            );
        }
        checks.push(check);
    }

    let monitor_registers = monitor.registers()?;
    let stub_pc = client.read_registers().ok().map(|bank| bank.pc);
    let consistent = checks.iter().all(|c| c.consistent);
    emit(&MonitorReport {
        checks,
        monitor_registers,
        stub_pc,
        consistent,
    })
}
