//! Kinesia CLI - Command-line interface for the screening pipeline
//!
//! Commands:
//! - train: Train and calibrate an engine from archived session exports
//! - score: Score one session export with a fitted engine
//! - validate: Check session exports for loadable frames and windows
//! - doctor: Diagnose engine artifacts and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use kinesia::adapters::{discover_user_sessions, load_dream_sequence};
use kinesia::cache::DiskFeatureCache;
use kinesia::model::train::TrainConfig;
use kinesia::pipeline::{estimate_fps, fit_screening, PipelineConfig, ScreeningEngine};
use kinesia::types::{InferenceRequest, InferenceResponse};
use kinesia::{ScreenError, FRAME_SCHEMA_VERSION, KINESIA_VERSION, PRODUCER_NAME};

/// Kinesia - Behavioral movement screening from session recordings
#[derive(Parser)]
#[command(name = "kinesia")]
#[command(version = KINESIA_VERSION)]
#[command(about = "Screen movement sessions with a calibrated sequence model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train and calibrate an engine from archived session exports
    Train {
        /// Root directory holding per-user session directories
        #[arg(short, long)]
        data_root: PathBuf,

        /// Engine output path
        #[arg(short, long)]
        output: PathBuf,

        /// Feature cache directory
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Training epochs
        #[arg(long, default_value = "60")]
        epochs: usize,

        /// Windows per model input sequence
        #[arg(long, default_value = "10")]
        seq_len: usize,

        /// Seed for the user split and training
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Print the training report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score one session export with a fitted engine
    Score {
        /// Engine artifact from `train`
        #[arg(short, long)]
        engine: PathBuf,

        /// Session export path (use - for a request on stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Task context name (imitation, joint_attention, turn_taking)
        #[arg(long)]
        task: Option<String>,

        /// Output format
        #[arg(long, default_value = "json")]
        output_format: OutputFormat,
    },

    /// Check session exports for loadable frames and windows
    Validate {
        /// Session export file or a data root of user directories
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose engine artifacts and configuration
    Doctor {
        /// Check an engine artifact
        #[arg(long)]
        engine: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), KinesiaCliError> {
    match cli.command {
        Commands::Train {
            data_root,
            output,
            cache_dir,
            epochs,
            seq_len,
            seed,
            json,
        } => cmd_train(&data_root, &output, cache_dir.as_deref(), epochs, seq_len, seed, json),

        Commands::Score {
            engine,
            input,
            task,
            output_format,
        } => cmd_score(&engine, &input, task.as_deref(), output_format),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor { engine, json } => cmd_doctor(engine.as_deref(), json),
    }
}

fn cmd_train(
    data_root: &Path,
    output: &Path,
    cache_dir: Option<&Path>,
    epochs: usize,
    seq_len: usize,
    seed: u64,
    json: bool,
) -> Result<(), KinesiaCliError> {
    let cache_root = match cache_dir {
        Some(dir) => dir.to_path_buf(),
        None => data_root.join(".kinesia-cache"),
    };
    let cache = DiskFeatureCache::open(&cache_root)?;

    let cfg = PipelineConfig {
        seq_len,
        split_seed: seed,
        train: TrainConfig {
            epochs,
            seed,
            ..TrainConfig::default()
        },
        ..PipelineConfig::default()
    };

    let fitted = fit_screening(data_root, &cache, &cfg)?;
    let engine = ScreeningEngine::new(fitted.model, fitted.calibration, cfg.window.clone());
    engine.save(output)?;

    if json {
        let report = serde_json::json!({
            "producer": PRODUCER_NAME,
            "version": KINESIA_VERSION,
            "engine_path": output,
            "split": fitted.split,
            "final_loss": fitted.history.last().map(|s| s.loss),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Training Report");
        println!("===============");
        println!("Train users:       {}", fitted.split.train_users.len());
        println!("Calibration users: {}", fitted.split.calibration_users.len());
        println!("Test users:        {}", fitted.split.test_users.len());
        println!("Skipped sessions:  {}", fitted.split.skipped_sessions.len());
        for session in &fitted.split.skipped_sessions {
            println!("  [SKIP] {}", session);
        }
        if let Some(last) = fitted.history.last() {
            println!("Final loss:        {:.6}", last.loss);
        }
        println!("Engine written to  {}", output.display());
    }

    Ok(())
}

fn cmd_score(
    engine_path: &Path,
    input: &Path,
    task: Option<&str>,
    output_format: OutputFormat,
) -> Result<(), KinesiaCliError> {
    let engine = ScreeningEngine::load(engine_path)?;

    let request = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        serde_json::from_str::<InferenceRequest>(&buffer)?
    } else {
        let sequence = load_dream_sequence(input)?;
        let fps = estimate_fps(&sequence);
        InferenceRequest {
            fps,
            sequence,
            task: task.map(|t| t.to_string()),
        }
    };

    let response: InferenceResponse = engine.score(&request)?;

    let output = match output_format {
        OutputFormat::Json => serde_json::to_string(&response)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&response)?,
    };
    println!("{}", output);

    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), KinesiaCliError> {
    let sessions: Vec<PathBuf> = if input.is_dir() {
        discover_user_sessions(input)?
            .into_iter()
            .flat_map(|(_, files)| files)
            .collect()
    } else {
        vec![input.to_path_buf()]
    };

    if sessions.is_empty() {
        return Err(KinesiaCliError::NoSessions);
    }

    let mut details: Vec<ValidationDetail> = Vec::new();
    for session in &sessions {
        match load_dream_sequence(session) {
            Ok(records) => {
                let valid = records.iter().filter(|r| r.valid).count();
                details.push(ValidationDetail {
                    session: session.display().to_string(),
                    loadable: true,
                    frames: records.len(),
                    valid_frames: valid,
                    error: None,
                });
            }
            Err(e) => details.push(ValidationDetail {
                session: session.display().to_string(),
                loadable: false,
                frames: 0,
                valid_frames: 0,
                error: Some(e.to_string()),
            }),
        }
    }

    let invalid = details.iter().filter(|d| !d.loadable).count();
    let report = ValidationReport {
        total_sessions: details.len(),
        loadable_sessions: details.len() - invalid,
        failed_sessions: invalid,
        details,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total sessions:    {}", report.total_sessions);
        println!("Loadable sessions: {}", report.loadable_sessions);
        println!("Failed sessions:   {}", report.failed_sessions);

        for detail in &report.details {
            if detail.loadable {
                println!(
                    "  [OK]  {} ({} frames, {} valid)",
                    detail.session, detail.frames, detail.valid_frames
                );
            } else {
                println!(
                    "  [ERR] {}: {}",
                    detail.session,
                    detail.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    if report.failed_sessions > 0 {
        Err(KinesiaCliError::ValidationFailed(report.failed_sessions))
    } else {
        Ok(())
    }
}

fn cmd_doctor(engine: Option<&Path>, json: bool) -> Result<(), KinesiaCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "kinesia_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Kinesia version {}", KINESIA_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Frame schema: {}", FRAME_SCHEMA_VERSION),
    });

    if let Some(engine_path) = engine {
        if engine_path.exists() {
            match ScreeningEngine::load(engine_path) {
                Ok(loaded) => {
                    checks.push(DoctorCheck {
                        name: "engine".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Engine valid (calibration {}, mu {:.6}, sigma {:.6})",
                            loaded.calibration().record_id,
                            loaded.calibration().mu,
                            loaded.calibration().sigma
                        ),
                    });
                }
                Err(e) => {
                    checks.push(DoctorCheck {
                        name: "engine".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid engine artifact: {}", e),
                    });
                }
            }
        } else {
            checks.push(DoctorCheck {
                name: "engine".to_string(),
                status: CheckStatus::Warning,
                message: "Engine file does not exist".to_string(),
            });
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: KINESIA_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Kinesia Doctor Report");
        println!("=====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(KinesiaCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum KinesiaCliError {
    Io(io::Error),
    Screen(ScreenError),
    Json(serde_json::Error),
    NoSessions,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for KinesiaCliError {
    fn from(e: io::Error) -> Self {
        KinesiaCliError::Io(e)
    }
}

impl From<ScreenError> for KinesiaCliError {
    fn from(e: ScreenError) -> Self {
        KinesiaCliError::Screen(e)
    }
}

impl From<serde_json::Error> for KinesiaCliError {
    fn from(e: serde_json::Error) -> Self {
        KinesiaCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<KinesiaCliError> for CliError {
    fn from(e: KinesiaCliError) -> Self {
        match e {
            KinesiaCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            KinesiaCliError::Screen(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'kinesia validate' on the input".to_string()),
            },
            KinesiaCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            KinesiaCliError::NoSessions => CliError {
                code: "NO_SESSIONS".to_string(),
                message: "No session files found in input".to_string(),
                hint: Some("Expected user directories holding .json session exports".to_string()),
            },
            KinesiaCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} sessions failed validation", count),
                hint: Some("Fix or remove the failing exports and retry".to_string()),
            },
            KinesiaCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_sessions: usize,
    loadable_sessions: usize,
    failed_sessions: usize,
    details: Vec<ValidationDetail>,
}

#[derive(serde::Serialize)]
struct ValidationDetail {
    session: String,
    loadable: bool,
    frames: usize,
    valid_frames: usize,
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
