//! PATHFINDER: offline replay and simulation for the pathfinder navigation engine.
//!
//! - `replay`: run recorded sensor logs (CSV) through the engine and write the published state over time.
//! - `synth`: generate a reproducible out-and-back walk with GNSS and compass noise, optionally replaying it.
//! - `config`: write a template engine configuration file.
//!
//! Engine parameters can be loaded from a configuration file (TOML/JSON/YAML) with `--config`.
mod common;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};

use common::{ensure_output_dir, get_csv_files, init_logger, output_file_for};
use pathfinder::PathfinderConfig;
use pathfinder::earth::{DeclinationModel, DipoleDeclination, NoDeclination, WorldMagneticModel};
use pathfinder::messages::{FixScheduler, ReplayPlan, build_event_stream};
use pathfinder::sim::{NavigationResult, SensorRecord, SyntheticWalk, replay, synthetic_walk};

const LONG_ABOUT: &str = "PATHFINDER: offline replay and simulation for the pathfinder navigation engine.

The engine smooths GNSS fixes, fuses compass azimuth with the GNSS course of travel, captures an
anchor from a short burst of fixes, and reports the distance and relative bearing back to it.

- replay: run recorded sensor logs through the engine. Fix outages can be simulated with a fixed
  fix interval or ON/OFF duty cycling.
- synth: generate a synthetic out-and-back walk as a sensor log.
- config: write a template engine configuration file.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Offline replay and simulation for the pathfinder navigation engine.", long_about = LONG_ABOUT)]
struct Cli {
    /// Engine configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "replay",
        about = "Replay recorded sensor logs",
        long_about = "Replay recorded sensor logs through the navigation engine on a simulated clock. Location permission is granted at the first record; the save and reset actions are pressed at the given offsets."
    )]
    Replay(ReplayArgs),
    #[command(name = "synth", about = "Generate a synthetic out-and-back walk")]
    Synth(SynthArgs),
    #[command(name = "config", about = "Write a template engine configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Magnetic declination source used to turn compass readings into true headings
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum DeclinationChoice {
    /// World Magnetic Model
    Wmm,
    /// Tilted-dipole approximation
    Dipole,
    /// No correction
    Off,
}
impl DeclinationChoice {
    fn model(self) -> Arc<dyn DeclinationModel> {
        match self {
            DeclinationChoice::Wmm => Arc::new(WorldMagneticModel),
            DeclinationChoice::Dipole => Arc::new(DipoleDeclination),
            DeclinationChoice::Off => Arc::new(NoDeclination),
        }
    }
}

#[derive(Args, Clone, Debug, Default)]
struct SchedulerArgs {
    /// Deliver at most one fix every N seconds
    #[arg(long, conflicts_with = "duty_on_s")]
    fix_interval_s: Option<f64>,
    /// Length of the windows with fixes in seconds (duty cycling)
    #[arg(long, requires = "duty_off_s")]
    duty_on_s: Option<f64>,
    /// Length of the windows without fixes in seconds (duty cycling)
    #[arg(long, requires = "duty_on_s")]
    duty_off_s: Option<f64>,
}

fn seconds_to_ms(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

fn build_scheduler(args: &SchedulerArgs) -> FixScheduler {
    match (args.fix_interval_s, args.duty_on_s, args.duty_off_s) {
        (Some(interval), _, _) => FixScheduler::FixedInterval {
            interval_ms: seconds_to_ms(interval),
            phase_ms: 0,
        },
        (None, Some(on), Some(off)) => FixScheduler::DutyCycle {
            on_ms: seconds_to_ms(on),
            off_ms: seconds_to_ms(off),
            start_phase_ms: 0,
        },
        _ => FixScheduler::PassThrough,
    }
}

#[derive(Args, Clone, Debug)]
struct ReplayArgs {
    /// Input CSV file or directory containing CSV files
    #[arg(short, long)]
    input: PathBuf,
    /// Output CSV file, or directory when the input is a directory
    #[arg(short, long)]
    output: PathBuf,
    /// Press "save location" this many seconds after the first record
    #[arg(long)]
    capture_after_s: Option<f64>,
    /// Press "reset" this many seconds after the first record
    #[arg(long)]
    reset_after_s: Option<f64>,
    #[arg(long, value_enum, default_value_t = DeclinationChoice::Wmm)]
    declination: DeclinationChoice,
    #[command(flatten)]
    scheduler: SchedulerArgs,
}

#[derive(Args, Clone, Debug)]
struct SynthArgs {
    /// Output CSV file for the generated sensor log
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Duration of each leg of the walk in seconds
    #[arg(long, default_value_t = 60.0)]
    walk_s: f64,
    #[arg(long, default_value_t = 1.4)]
    speed_mps: f64,
    #[arg(long, default_value_t = 45.0)]
    heading_deg: f64,
    /// Reported horizontal accuracy in meters
    #[arg(long, default_value_t = 5.0)]
    accuracy_m: f32,
    /// Sensor rate in Hz
    #[arg(long, default_value_t = 2.0)]
    rate_hz: f64,
    #[arg(long, value_enum, default_value_t = DeclinationChoice::Wmm)]
    declination: DeclinationChoice,
    /// Also replay the generated log (saving the location during the first dwell) and write the result here
    #[arg(long)]
    replay_output: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output path; the extension selects the format (.toml, .json, .yaml)
    #[arg(short, long, default_value = "pathfinder.toml")]
    output: PathBuf,
}

fn load_config(path: Option<&PathBuf>) -> Result<PathfinderConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => {
            info!("Loading engine configuration from {}", path.display());
            PathfinderConfig::from_file(path)?
        }
        None => PathfinderConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn summarize(label: &str, result: &NavigationResult) {
    match result.last() {
        Some(last) => info!(
            "{}: {} states, final phase {:?}, first arrival {:?}, max distance {:?} m",
            label,
            result.records.len(),
            last.phase,
            result.first_arrival_ms(),
            result.max_distance_m()
        ),
        None => warn!("{}: no states produced", label),
    }
}

fn run_replay(args: &ReplayArgs, config: &PathfinderConfig) -> Result<(), Box<dyn Error>> {
    let files = get_csv_files(&args.input)?;
    let plan = ReplayPlan {
        scheduler: build_scheduler(&args.scheduler),
        capture_after_ms: args.capture_after_s.map(seconds_to_ms),
        reset_after_ms: args.reset_after_s.map(seconds_to_ms),
    };
    let to_directory = args.input.is_dir();
    if to_directory {
        ensure_output_dir(&args.output)?;
    }
    for file in &files {
        info!("Replaying {}", file.display());
        let records = SensorRecord::from_csv(file)?;
        if records.is_empty() {
            warn!("{} has no records, skipping", file.display());
            continue;
        }
        let stream = build_event_stream(&records, &plan);
        let result = replay(&stream, config, args.declination.model())?;
        let output = if to_directory {
            output_file_for(file, &args.output)
        } else {
            args.output.clone()
        };
        result.to_csv(&output)?;
        summarize(&file.display().to_string(), &result);
        info!("Wrote {}", output.display());
    }
    Ok(())
}

fn run_synth(args: &SynthArgs, config: &PathfinderConfig) -> Result<(), Box<dyn Error>> {
    let walk = SyntheticWalk {
        seed: args.seed,
        walk_s: args.walk_s,
        speed_mps: args.speed_mps,
        heading_deg: args.heading_deg,
        accuracy_m: args.accuracy_m,
        rate_hz: args.rate_hz,
        ..Default::default()
    };
    let model = args.declination.model();
    let records = synthetic_walk(&walk, model.as_ref())?;
    SensorRecord::to_csv(&records, &args.output)?;
    info!(
        "Wrote {} records ({:.0} s) to {}",
        records.len(),
        walk.duration_s(),
        args.output.display()
    );
    if let Some(replay_output) = &args.replay_output {
        let plan = ReplayPlan {
            capture_after_ms: Some(seconds_to_ms(walk.dwell_s / 2.0)),
            ..Default::default()
        };
        let stream = build_event_stream(&records, &plan);
        let result = replay(&stream, config, model)?;
        result.to_csv(replay_output)?;
        summarize("synthetic walk", &result);
    }
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    PathfinderConfig::default().to_file(&args.output)?;
    info!("Wrote template configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;
    match &cli.command {
        Command::CreateConfig(args) => create_config_file(args),
        Command::Replay(args) => run_replay(args, &load_config(cli.config.as_ref())?),
        Command::Synth(args) => run_synth(args, &load_config(cli.config.as_ref())?),
    }
}
