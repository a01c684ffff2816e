//! Battery CLI - Command-line interface for the readiness battery
//!
//! Commands:
//! - simulate: Run synthetic sessions and emit their logs or reports
//! - metrics: Extract per-layer metrics from a session log
//! - score: Score session logs against persisted baselines
//! - profile: Print or validate weight profiles
//! - trend: Summarize baseline histories from a saved state file

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use readiness_battery::baseline::DEFAULT_BASELINE_WINDOW;
use readiness_battery::pipeline::{parse_session_log, BatteryProcessor};
use readiness_battery::simulate::{simulate_history, SimulationConfig};
use readiness_battery::types::{SessionLog, SessionOutcome};
use readiness_battery::{
    BatteryConfig, ComputeError, Difficulty, MetricsExtractor, SessionReport, WeightProfile,
    BATTERY_VERSION, PRODUCER_NAME,
};

/// Battery - layered readiness test scheduler and scorer
#[derive(Parser)]
#[command(name = "battery")]
#[command(version = BATTERY_VERSION)]
#[command(about = "Run, measure and score the layered readiness battery", long_about = None)]
struct Cli {
    /// Battery configuration JSON (defaults for anything not given)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run synthetic sessions (one session log or report per line)
    Simulate {
        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Difficulty preset
        #[arg(long, default_value = "standard")]
        difficulty: DifficultyArg,

        /// Seed of the first session; later sessions increment it
        #[arg(long, default_value = "1")]
        seed: u64,

        /// Host tick rate in Hz
        #[arg(long, default_value = "60")]
        tick_hz: f64,

        /// Number of consecutive sessions
        #[arg(long, default_value = "1")]
        sessions: usize,

        /// Abort each session this many seconds in
        #[arg(long)]
        abort_after: Option<f64>,

        /// Emit scored reports instead of raw session logs
        #[arg(long)]
        report: bool,
    },

    /// Extract per-layer metrics from a session log
    Metrics {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Score session logs (one JSON log per line) in order
    Score {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Weight profile JSON (default profile otherwise)
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Baseline window in sessions
        #[arg(long, default_value_t = DEFAULT_BASELINE_WINDOW)]
        baseline_window: usize,

        /// Load processor state from file
        #[arg(long)]
        load_baselines: Option<PathBuf>,

        /// Save processor state to file after scoring
        #[arg(long)]
        save_baselines: Option<PathBuf>,
    },

    /// Print the default weight profile or validate one
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Trend, shift and shape of every baseline history in a state file
    Trend {
        /// Processor state saved by `score --save-baselines`
        #[arg(long)]
        baselines: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Print the built-in profile
    Default,
    /// Check a profile's layers, weights and alpha
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DifficultyArg {
    Easy,
    Standard,
    Hard,
}

impl From<DifficultyArg> for Difficulty {
    fn from(arg: DifficultyArg) -> Self {
        match arg {
            DifficultyArg::Easy => Difficulty::Easy,
            DifficultyArg::Standard => Difficulty::Standard,
            DifficultyArg::Hard => Difficulty::Hard,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BatteryCliError> {
    let config = match cli.config.as_deref() {
        Some(path) => BatteryConfig::from_json(&read_input(path)?)?,
        None => BatteryConfig::default(),
    };

    match cli.command {
        Commands::Simulate {
            output,
            difficulty,
            seed,
            tick_hz,
            sessions,
            abort_after,
            report,
        } => {
            let sim = SimulationConfig {
                difficulty: difficulty.into(),
                seed,
                tick_hz,
                abort_after_sec: abort_after,
                ..SimulationConfig::default()
            };
            cmd_simulate(&config, &sim, sessions, report, &output)
        }

        Commands::Metrics { input, output } => cmd_metrics(&config, &input, &output),

        Commands::Score {
            input,
            output,
            profile,
            baseline_window,
            load_baselines,
            save_baselines,
        } => cmd_score(
            config,
            &input,
            &output,
            profile.as_deref(),
            baseline_window,
            load_baselines.as_deref(),
            save_baselines.as_deref(),
        ),

        Commands::Profile { action } => cmd_profile(action),

        Commands::Trend { baselines, json } => cmd_trend(config, &baselines, json),
    }
}

fn cmd_simulate(
    config: &BatteryConfig,
    sim: &SimulationConfig,
    sessions: usize,
    report: bool,
    output: &Path,
) -> Result<(), BatteryCliError> {
    if sessions == 0 {
        return Err(BatteryCliError::NoSessions);
    }
    let finished = simulate_history(config, sim, sessions)?;

    let mut lines = Vec::with_capacity(finished.len());
    if report {
        let mut processor = BatteryProcessor::new(config.clone(), WeightProfile::default())?;
        for session in finished {
            match processor.process_metrics(&session.log, session.metrics) {
                Ok(report) => lines.push(serde_json::to_string(&report)?),
                Err(ComputeError::SessionAborted(id)) => log::warn!("skipping aborted session {id}"),
                Err(e) => return Err(e.into()),
            }
        }
    } else {
        for session in &finished {
            lines.push(serde_json::to_string(&session.log)?);
        }
    }

    write_output(output, &join_lines(&lines))
}

fn cmd_metrics(config: &BatteryConfig, input: &Path, output: &Path) -> Result<(), BatteryCliError> {
    let log = parse_session_log(&read_input(input)?)?;
    if log.events.is_empty() {
        return Err(BatteryCliError::NoEvents);
    }
    let metrics = MetricsExtractor::new(config.metrics.clone()).extract(&log);
    write_output(output, &format_json(&metrics, output)?)
}

fn cmd_score(
    config: BatteryConfig,
    input: &Path,
    output: &Path,
    profile: Option<&Path>,
    baseline_window: usize,
    load_baselines: Option<&Path>,
    save_baselines: Option<&Path>,
) -> Result<(), BatteryCliError> {
    let profile = match profile {
        Some(path) => WeightProfile::from_json(&read_input(path)?)?,
        None => WeightProfile::default(),
    };
    let mut processor = BatteryProcessor::with_baseline_window(config, profile, baseline_window)?;

    if let Some(path) = load_baselines {
        processor.load_baselines(&fs::read_to_string(path)?)?;
    }

    let logs = parse_logs(&read_input(input)?)?;
    if logs.is_empty() {
        return Err(BatteryCliError::NoSessions);
    }

    let mut reports: Vec<SessionReport> = Vec::with_capacity(logs.len());
    let mut skipped = 0usize;
    for log in &logs {
        if log.outcome == SessionOutcome::Aborted {
            skipped += 1;
            log::warn!("skipping aborted session {}", log.session_id);
            continue;
        }
        reports.push(processor.process(log)?);
    }
    if skipped > 0 {
        log::info!("{skipped} aborted sessions skipped");
    }

    if let Some(path) = save_baselines {
        fs::write(path, processor.save_baselines()?)?;
    }

    let lines = reports
        .iter()
        .map(serde_json::to_string)
        .collect::<Result<Vec<_>, _>>()?;
    write_output(output, &join_lines(&lines))
}

fn cmd_profile(action: ProfileAction) -> Result<(), BatteryCliError> {
    match action {
        ProfileAction::Default => {
            println!("{}", WeightProfile::default().to_json()?);
            Ok(())
        }
        ProfileAction::Validate { input } => {
            let profile = WeightProfile::from_json(&read_input(&input)?)?;
            println!("Profile {:?} ({}) is valid", profile.id, profile.name);
            Ok(())
        }
    }
}

fn cmd_trend(config: BatteryConfig, baselines: &Path, json: bool) -> Result<(), BatteryCliError> {
    let mut processor = BatteryProcessor::new(config, WeightProfile::default())?;
    processor.load_baselines(&fs::read_to_string(baselines)?)?;
    let reports = processor.trends();

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("Battery Trend Report");
    println!("====================");
    println!("Producer: {} {}", PRODUCER_NAME, BATTERY_VERSION);
    println!("Sessions: {}", processor.session_count());
    if reports.is_empty() {
        println!("\nNot enough history yet.");
        return Ok(());
    }
    println!();
    for report in &reports {
        let name = match report.key.metric {
            readiness_battery::types::BaselineMetric::Layer(metric) => metric.as_str().to_string(),
            readiness_battery::types::BaselineMetric::Crs => "crs".to_string(),
        };
        let layer = report
            .key
            .layer
            .map(|l| format!("L{l}"))
            .unwrap_or_else(|| "--".to_string());
        println!(
            "  {layer} {name:<24} n={:<3} median={:>9.2} slope={:>+8.3}/session  {:?}",
            report.sessions, report.shape.median, report.trend.slope, report.trend.direction
        );
    }
    Ok(())
}

// Helper functions

fn read_input(path: &Path) -> Result<String, BatteryCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(path: &Path, data: &str) -> Result<(), BatteryCliError> {
    if path.to_string_lossy() == "-" {
        print!("{}", data);
        Ok(())
    } else {
        Ok(fs::write(path, data)?)
    }
}

/// Pretty JSON for a terminal, compact otherwise
fn format_json<T: serde::Serialize>(value: &T, output: &Path) -> Result<String, BatteryCliError> {
    let to_terminal = output.to_string_lossy() == "-" && atty::is(atty::Stream::Stdout);
    let body = if to_terminal {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(body + "\n")
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        lines.join("\n") + "\n"
    }
}

/// Session logs as NDJSON, or a single (possibly pretty-printed) document
fn parse_logs(input: &str) -> Result<Vec<SessionLog>, BatteryCliError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if let Ok(log) = parse_session_log(trimmed) {
        return Ok(vec![log]);
    }
    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| {
            parse_session_log(line)
                .map_err(|e| BatteryCliError::ParseError(format!("line {}: {}", i + 1, e)))
        })
        .collect()
}

#[derive(Debug)]
enum BatteryCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoEvents,
    NoSessions,
    ParseError(String),
}

impl From<io::Error> for BatteryCliError {
    fn from(e: io::Error) -> Self {
        BatteryCliError::Io(e)
    }
}

impl From<ComputeError> for BatteryCliError {
    fn from(e: ComputeError) -> Self {
        BatteryCliError::Compute(e)
    }
}

impl From<serde_json::Error> for BatteryCliError {
    fn from(e: serde_json::Error) -> Self {
        BatteryCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BatteryCliError> for CliError {
    fn from(e: BatteryCliError) -> Self {
        match e {
            BatteryCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BatteryCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::Configuration(_) => {
                        ("CONFIG_ERROR", "Check the --config file or weight profile")
                    }
                    ComputeError::SessionAborted(_) => {
                        ("SESSION_ABORTED", "Aborted sessions are never scored")
                    }
                    ComputeError::ParseError(_) | ComputeError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure input is a session log produced by the battery")
                    }
                    _ => ("COMPUTE_ERROR", "Re-run with RUST_LOG=debug for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            BatteryCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BatteryCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "Session log contains no events".to_string(),
                hint: Some("Ensure the session was started before it was saved".to_string()),
            },
            BatteryCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No sessions to process".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            BatteryCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Expect one JSON session log per line".to_string()),
            },
        }
    }
}
