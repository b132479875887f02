use clap::{Parser, Subcommand};
use irrigation_engine::bridge::{EntityBridge, MemoryBridge};
use irrigation_engine::clock::{ConfiguredLightSchedule, SystemClock};
use irrigation_engine::config::EngineConfig;
use irrigation_engine::ids::ZoneId;
use irrigation_engine::persistence::lockfile::ProcessLock;
use irrigation_engine::persistence::PersistenceStore;
use irrigation_engine::types::Priority;
use irrigation_engine::zone::Phase;
use irrigation_engine::{Coordinator, EngineError};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "irrigation-engine", about = "Autonomous precision-irrigation controller")]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,

    /// Directory holding the process lock and state snapshot.
    #[arg(long, env = "IRRIGATION_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine until interrupted (default if no subcommand given).
    Run,
    /// Boot against the data directory and print in-memory zone state plus the last snapshot.
    Inspect,
    /// Replay the crash-recovery shutdown sequence against a snapshot file, then exit.
    Restore { path: PathBuf },
    /// `ForcePhase` (spec.md §6): jump a zone straight to a phase.
    ForcePhase {
        zone: u32,
        #[arg(value_enum)]
        phase: PhaseArg,
        #[arg(long, default_value = "operator-requested")]
        reason: String,
    },
    /// `ExecuteShot` (spec.md §6): queue an operator-requested shot outside the normal decision path.
    ExecuteShot {
        zone: u32,
        volume_ml: f64,
        #[arg(long, default_value = "manual")]
        shot_type: String,
    },
    /// `SetManualOverride` (spec.md §6): open or clear a zone's manual-override window.
    SetOverride {
        zone: u32,
        enable: bool,
        #[arg(long, default_value_t = 3600)]
        timeout_sec: u64,
    },
    /// `CheckTransitionConditions` (spec.md §6): print the decision a tick would produce right now.
    Check { zone: u32 },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum PhaseArg {
    P0,
    P1,
    P2,
    P3,
}

impl From<PhaseArg> for Phase {
    fn from(p: PhaseArg) -> Self {
        match p {
            PhaseArg::P0 => Phase::P0,
            PhaseArg::P1 => Phase::P1,
            PhaseArg::P2 => Phase::P2,
            PhaseArg::P3 => Phase::P3,
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = CliArgs::parse();

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(args.data_dir).await,
        Command::Inspect => inspect(args.data_dir).await,
        Command::Restore { path } => restore(path).await,
        Command::ForcePhase { zone, phase, reason } => force_phase(args.data_dir, zone, phase.into(), reason).await,
        Command::ExecuteShot { zone, volume_ml, shot_type } => execute_shot(args.data_dir, zone, volume_ml, shot_type).await,
        Command::SetOverride { zone, enable, timeout_sec } => set_override(args.data_dir, zone, enable, timeout_sec).await,
        Command::Check { zone } => check(args.data_dir, zone).await,
    }
}

async fn run(data_dir: PathBuf) -> ExitCode {
    let config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let _lock = match ProcessLock::acquire(&data_dir) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!("could not acquire process lock: {e}");
            return ExitCode::from(1);
        }
    };

    irrigation_engine::config::init(config.clone());

    let bridge: Arc<dyn EntityBridge> = Arc::new(MemoryBridge::new());

    let persistence = Arc::new(PersistenceStore::new(data_dir.join("state.json")));
    let clock = Arc::new(SystemClock);
    let schedule = Arc::new(ConfiguredLightSchedule::new(
        config.light_schedule.on_time(),
        config.light_schedule.off_time(),
    ));

    let coordinator = Arc::new(Coordinator::new(&config, bridge, persistence.clone(), clock, schedule));
    if let Err(e) = coordinator.boot().await {
        match e {
            EngineError::PersistenceUnrecoverable(_) => {
                tracing::error!("persistence unrecoverable: {e}");
                return ExitCode::from(2);
            }
            other => tracing::warn!("boot warning: {other}"),
        }
    }

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_cancel.cancel();
    });

    coordinator.run(cancel).await;
    ExitCode::SUCCESS
}

/// Boots a coordinator against `data_dir` the same way `run` does, without
/// starting the tick/sequencer/snapshot loops, for the out-of-band CLI
/// commands (spec.md §6) to make one call against.
async fn boot_coordinator(data_dir: &PathBuf) -> Result<(Arc<Coordinator>, Arc<PersistenceStore>), ExitCode> {
    let config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Err(ExitCode::from(1));
        }
    };
    if !irrigation_engine::config::is_initialized() {
        irrigation_engine::config::init(config.clone());
    }

    let bridge: Arc<dyn EntityBridge> = Arc::new(MemoryBridge::new());
    let persistence = Arc::new(PersistenceStore::new(data_dir.join("state.json")));
    let clock = Arc::new(SystemClock);
    let schedule = Arc::new(ConfiguredLightSchedule::new(
        config.light_schedule.on_time(),
        config.light_schedule.off_time(),
    ));

    let coordinator = Arc::new(Coordinator::new(&config, bridge, persistence.clone(), clock, schedule));
    if let Err(e) = coordinator.boot().await {
        tracing::warn!("boot warning: {e}");
    }
    Ok((coordinator, persistence))
}

/// `inspect` (spec.md §6): "print current in-memory state and last
/// snapshot". Boots a coordinator against the data directory (applying any
/// persisted state over topology defaults, same as `run`) and prints both
/// that in-memory result and the raw snapshot file's own timestamp.
async fn inspect(data_dir: PathBuf) -> ExitCode {
    let (coordinator, persistence) = match boot_coordinator(&data_dir).await {
        Ok(pair) => pair,
        Err(code) => return code,
    };

    let states = coordinator.zone_states().await;
    println!("{} zone(s) in memory:", states.len());
    let mut ids: Vec<_> = states.keys().copied().collect();
    ids.sort();
    for id in ids {
        let rt = &states[&id];
        println!(
            "  zone {}: phase={} shots_in_phase={} daily_usage_ml={:.1} unsafe={} manual_override_until={:?}",
            id.0, rt.phase, rt.shots_in_phase, rt.daily_usage_ml, rt.unsafe_flag, rt.manual_override_until
        );
    }

    match persistence.load().await {
        Ok(state) => println!(
            "last snapshot: schema_version={} timestamp={} zones={} job_in_flight={}",
            state.schema_version,
            state.timestamp,
            state.zones.len(),
            state.job_in_flight.is_some()
        ),
        Err(e) => println!("last snapshot: none ({e})"),
    }

    ExitCode::SUCCESS
}

async fn force_phase(data_dir: PathBuf, zone: u32, phase: Phase, reason: String) -> ExitCode {
    let (coordinator, _persistence) = match boot_coordinator(&data_dir).await {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match coordinator.force_phase(ZoneId(zone), phase, &reason).await {
        Ok(()) => {
            println!("zone {zone} forced to {phase}");
            let _ = coordinator.snapshot().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("force-phase failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn execute_shot(data_dir: PathBuf, zone: u32, volume_ml: f64, shot_type: String) -> ExitCode {
    let (coordinator, _persistence) = match boot_coordinator(&data_dir).await {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    // Leaked deliberately: the sequencer job this enqueues carries a
    // `&'static str` reason, and a one-shot CLI process never reclaims it.
    let shot_type: &'static str = Box::leak(shot_type.into_boxed_str());
    match coordinator.execute_shot(ZoneId(zone), volume_ml, shot_type, Priority::Critical).await {
        Ok(()) => {
            println!("shot queued for zone {zone}: {volume_ml} ml");
            let _ = coordinator.snapshot().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("execute-shot failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn set_override(data_dir: PathBuf, zone: u32, enable: bool, timeout_sec: u64) -> ExitCode {
    let (coordinator, _persistence) = match boot_coordinator(&data_dir).await {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match coordinator.set_manual_override(ZoneId(zone), enable, timeout_sec).await {
        Ok(()) => {
            println!("zone {zone} manual override {}", if enable { "set" } else { "cleared" });
            let _ = coordinator.snapshot().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("set-override failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn check(data_dir: PathBuf, zone: u32) -> ExitCode {
    let (coordinator, _persistence) = match boot_coordinator(&data_dir).await {
        Ok(pair) => pair,
        Err(code) => return code,
    };
    match coordinator.check_transition_conditions(ZoneId(zone)).await {
        Ok(decision) => {
            println!("zone {zone} would decide: {decision:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("check failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn restore(path: PathBuf) -> ExitCode {
    let persistence = PersistenceStore::new(path);
    let bridge = MemoryBridge::new();
    match irrigation_engine::sequencer::recover_in_flight(&bridge, &persistence).await {
        Ok(true) => {
            println!("replayed an in-flight job's shutdown sub-sequence");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("no in-flight job recorded; nothing to replay");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("restore failed: {e}");
            ExitCode::from(2)
        }
    }
}
