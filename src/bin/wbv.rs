//! wbv - Command-line interface for the wellbeing/vitals pipeline
//!
//! Commands:
//! - extract: Download raw tables from PostgreSQL
//! - preprocess: Normalize the raw tables
//! - merge: Rolling aggregation and the merged analysis dataset
//! - correlate: Per-user wellbeing/vital correlations
//! - summarize: Wellbeing by binned vital level
//! - run: All of the above, writing a run manifest
//! - show-config: Print the effective configuration

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use wellbeing_vitals::config::{DstMode, LogFormat, PipelineConfig};
use wellbeing_vitals::extractor::PgSource;
use wellbeing_vitals::logging::init_logging;
use wellbeing_vitals::pipeline::{Pipeline, StageReport};
use wellbeing_vitals::{PipelineError, VERSION};

/// Align WHO-5 wellbeing surveys with rolling wearable vitals
#[derive(Parser)]
#[command(name = "wbv")]
#[command(version = VERSION)]
#[command(about = "Wellbeing survey and wearable vitals pipeline", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/main.yaml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download surveys, vitals and users into the raw checkpoint
    Extract,

    /// Normalize raw tables into the interim checkpoint
    Preprocess,

    /// Compute rolling aggregates and the merged dataset
    Merge,

    /// Correlate survey measures with rolling vitals per user and device
    Correlate,

    /// Summarize wellbeing by binned vital level
    Summarize,

    /// Run every stage and write a run manifest
    Run {
        /// Start from the existing raw checkpoint instead of the database
        #[arg(long)]
        skip_extract: bool,
    },

    /// Print the effective configuration as JSON
    ShowConfig,
}

/// Command line overrides applied on top of file and environment configuration
#[derive(Args)]
struct Overrides {
    /// Rolling window length in calendar days
    #[arg(long, global = true)]
    window_days: Option<u32>,

    /// Minimum observations in the window over all days
    #[arg(long, global = true)]
    min_days: Option<usize>,

    /// Minimum weekday observations in the window
    #[arg(long, global = true)]
    min_weekdays: Option<usize>,

    /// Minimum weekend observations in the window
    #[arg(long, global = true)]
    min_weekend_days: Option<usize>,

    /// Lower age bound of the middle age group
    #[arg(long, global = true)]
    age_level1: Option<f64>,

    /// Lower age bound of the oldest age group
    #[arg(long, global = true)]
    age_level2: Option<f64>,

    /// Daylight saving time correction of sleep timing
    #[arg(long, global = true)]
    dst_mode: Option<DstArg>,

    /// Drop vital records after this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    cutoff: Option<NaiveDate>,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Clone, ValueEnum)]
#[value(rename_all = "snake_case")]
enum DstArg {
    /// No correction
    None,
    /// One hour inside the configured date ranges
    FixedRanges,
    /// Per-record timezone offset
    RecordOffset,
}

impl From<DstArg> for DstMode {
    fn from(arg: DstArg) -> Self {
        match arg {
            DstArg::None => DstMode::None,
            DstArg::FixedRanges => DstMode::FixedRanges,
            DstArg::RecordOffset => DstMode::RecordOffset,
        }
    }
}

impl Overrides {
    fn apply(self, config: &mut PipelineConfig) {
        let rolling = &mut config.process.rolling;
        if let Some(v) = self.window_days {
            rolling.window_days = v;
        }
        if let Some(v) = self.min_days {
            rolling.min_days_total = v;
        }
        if let Some(v) = self.min_weekdays {
            rolling.min_weekdays = v;
        }
        if let Some(v) = self.min_weekend_days {
            rolling.min_weekend_days = v;
        }

        let users = &mut config.process.users;
        if let Some(v) = self.age_level1 {
            users.age_level1 = v;
        }
        if let Some(v) = self.age_level2 {
            users.age_level2 = v;
        }

        let vitals = &mut config.process.vitals;
        if let Some(v) = self.dst_mode {
            vitals.dst_mode = v.into();
        }
        if let Some(v) = self.cutoff {
            vitals.cutoff_date = v;
        }

        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if self.log_json {
            config.logging.format = LogFormat::Json;
        }
    }
}

fn main() -> ExitCode {
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

fn run(cli: Cli) -> Result<(), WbvCliError> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    config.validate()?;

    if let Commands::ShowConfig = cli.command {
        return print_json(&config);
    }

    init_logging(&config.logging)?;

    let pipeline = Pipeline::new(config);
    pipeline.prepare_directories()?;

    match cli.command {
        Commands::Extract => {
            let report = runtime()?.block_on(async {
                let source = PgSource::connect(&pipeline.config().database).await?;
                pipeline.extract(&source).await
            })?;
            print_json(&report)
        }
        Commands::Preprocess => print_json(&pipeline.preprocess()?),
        Commands::Merge => print_json(&pipeline.merge()?),
        Commands::Correlate => print_json(&pipeline.correlate()?),
        Commands::Summarize => print_json(&pipeline.summarize()?),
        Commands::Run { skip_extract } => {
            let manifest = if skip_extract {
                pipeline.run_offline()?
            } else {
                runtime()?.block_on(async {
                    let source = PgSource::connect(&pipeline.config().database).await?;
                    pipeline.run_all(&source).await
                })?
            };
            let summary: Vec<&StageReport> = manifest.stages.iter().collect();
            print_json(&RunSummary {
                run_id: manifest.run_id.to_string(),
                stages: summary,
            })
        }
        Commands::ShowConfig => Ok(()),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, WbvCliError> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), WbvCliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_id: String,
    stages: Vec<&'a StageReport>,
}

// Error types

#[derive(Debug)]
enum WbvCliError {
    Io(io::Error),
    Pipeline(PipelineError),
    Json(serde_json::Error),
}

impl From<io::Error> for WbvCliError {
    fn from(e: io::Error) -> Self {
        WbvCliError::Io(e)
    }
}

impl From<PipelineError> for WbvCliError {
    fn from(e: PipelineError) -> Self {
        WbvCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for WbvCliError {
    fn from(e: serde_json::Error) -> Self {
        WbvCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(code: &str, message: String, hint: &str) -> Self {
        CliError {
            code: code.to_string(),
            message,
            hint: Some(hint.to_string()),
        }
    }
}

impl From<WbvCliError> for CliError {
    fn from(e: WbvCliError) -> Self {
        match e {
            WbvCliError::Io(e) => CliError::new("IO_ERROR", e.to_string(), "Check file paths and permissions"),
            WbvCliError::Json(e) => CliError::new("JSON_ERROR", e.to_string(), "Check JSON syntax"),
            WbvCliError::Pipeline(e) => from_pipeline_error(e),
        }
    }
}

fn from_pipeline_error(e: PipelineError) -> CliError {
    let message = e.to_string();
    match e {
        PipelineError::Io(_) => {
            CliError::new("IO_ERROR", message, "Check data directories and run earlier stages first")
        }
        PipelineError::Csv(_) | PipelineError::MissingColumn(_) | PipelineError::MalformedField { .. } => {
            CliError::new("CHECKPOINT_ERROR", message, "Rerun the stage that writes this checkpoint")
        }
        PipelineError::Json(_) => CliError::new("JSON_ERROR", message, "Check JSON syntax"),
        PipelineError::Config(_) | PipelineError::InvalidConfig(_) => CliError::new(
            "CONFIG_ERROR",
            message,
            "Run 'wbv show-config' to inspect the effective configuration",
        ),
        PipelineError::Database(_) => {
            CliError::new("DATABASE_ERROR", message, "Check database connectivity and credentials")
        }
        PipelineError::MissingEnv(_) => CliError::new(
            "MISSING_ENV",
            message,
            "Set DATABASE_URL or DBNAME, DBUSER, PORT, HOST and PASSWORD",
        ),
        PipelineError::DuplicateKey { .. } => CliError::new(
            "DUPLICATE_KEY",
            message,
            "Rerun preprocess so vital rows are unique per user, device and date",
        ),
        PipelineError::DateOutOfRange(_) => {
            CliError::new("DATA_ERROR", message, "Check timestamps in the raw survey table")
        }
    }
}
