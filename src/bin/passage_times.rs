//! Passage Times CLI
//!
//! Commands:
//! - process: Compute REDCap fields for a batch of subjects
//! - check-config: Validate study tables and summarize them

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use passage_times::batch::{parse_array, parse_ndjson};
use passage_times::{process_batch, BatchReport, PassageError, StudyConfig, PASSAGE_TIMES_VERSION};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Passage Times - reading metrics for timed passage batteries
#[derive(Parser)]
#[command(name = "passage-times")]
#[command(version = PASSAGE_TIMES_VERSION)]
#[command(about = "Compute passage WPM metrics and format them for REDCap", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute REDCap fields for a batch of subjects
    Process {
        /// Study tables (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Write the full batch report (including failures) to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Exit with an error if any subject fails
        #[arg(long)]
        strict: bool,
    },

    /// Validate study tables and print a summary
    CheckConfig {
        /// Study tables (.toml or .json)
        #[arg(short, long)]
        config: PathBuf,

        /// Output summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one subject per line)
    Ndjson,
    /// JSON array of subjects
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one subject per line)
    Ndjson,
    /// JSON array of subjects
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

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

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    match cli.command {
        Commands::Process {
            config,
            input,
            output,
            input_format,
            output_format,
            report,
            strict,
        } => cmd_process(
            &config,
            &input,
            &output,
            input_format,
            output_format,
            report.as_deref(),
            strict,
        ),
        Commands::CheckConfig { config, json } => cmd_check_config(&config, json),
    }
}

fn cmd_process(
    config_path: &Path,
    input: &Path,
    output: &Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    report_path: Option<&Path>,
    strict: bool,
) -> Result<(), CliFailure> {
    let config = StudyConfig::from_path(config_path)?;

    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let subjects = match input_format {
        InputFormat::Ndjson => parse_ndjson(&input_data)?,
        InputFormat::Json => parse_array(&input_data)?,
    };
    if subjects.is_empty() {
        return Err(CliFailure::NoSubjects);
    }
    info!(subjects = subjects.len(), config = %config_path.display(), "processing batch");

    let report = process_batch(&config, subjects);

    if let Some(path) = report_path {
        fs::write(path, serde_json::to_string_pretty(&report)?)?;
    }

    let output_data = format_output(&report, &output_format)?;
    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    if strict && report.failed > 0 {
        return Err(CliFailure::SubjectsFailed(report.failed));
    }
    Ok(())
}

fn cmd_check_config(config_path: &Path, json: bool) -> Result<(), CliFailure> {
    let config = StudyConfig::from_path(config_path)?;

    let summary = ConfigSummary {
        version: PASSAGE_TIMES_VERSION.to_string(),
        groups: config
            .groups
            .iter()
            .map(|(&id, group)| GroupSummary {
                group: id,
                redcap_group: id - 1,
                baseline: group.baseline.len(),
                manipulation: group.manipulation.len(),
                near: group.near.clone(),
                far: group.far.clone(),
            })
            .collect(),
        versions: config
            .word_counts
            .iter()
            .map(|(version, counts)| VersionSummary {
                version: version.clone(),
                passages: counts.len(),
                missing_word_counts: config.coverage_gaps(version),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Study Tables");
        println!("============");
        println!("Groups:");
        for g in &summary.groups {
            println!(
                "  {} (REDCap {}): {} baseline, {} manipulation, near {}, far {}",
                g.group, g.redcap_group, g.baseline, g.manipulation, g.near, g.far
            );
        }
        println!("\nVersions:");
        for v in &summary.versions {
            if v.missing_word_counts.is_empty() {
                println!("  [OK] {}: {} passages", v.version, v.passages);
            } else {
                println!(
                    "  [WARN] {}: {} passages, missing {}",
                    v.version,
                    v.passages,
                    v.missing_word_counts.join(", ")
                );
            }
        }
    }

    Ok(())
}

/// Each subject is written as `{label, results}` or `{label, error}`
fn format_output(report: &BatchReport, format: &OutputFormat) -> Result<String, CliFailure> {
    match format {
        OutputFormat::Ndjson => Ok(report.outcomes_to_ndjson()?),
        OutputFormat::Json => Ok(serde_json::to_string(&report.outcomes)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(&report.outcomes)?),
    }
}

// Error types

#[derive(Debug)]
enum CliFailure {
    Io(io::Error),
    Passage(PassageError),
    Json(serde_json::Error),
    NoSubjects,
    SubjectsFailed(usize),
}

impl From<io::Error> for CliFailure {
    fn from(e: io::Error) -> Self {
        CliFailure::Io(e)
    }
}

impl From<PassageError> for CliFailure {
    fn from(e: PassageError) -> Self {
        CliFailure::Passage(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliFailure::Passage(PassageError::Io(e)) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CliFailure::Passage(e) if e.is_configuration_gap() => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'passage-times check-config' on the study tables".to_string()),
            },
            CliFailure::Passage(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Each subject needs label, version and record fields".to_string()),
            },
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CliFailure::NoSubjects => CliError {
                code: "NO_SUBJECTS".to_string(),
                message: "No subjects found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CliFailure::SubjectsFailed(count) => CliError {
                code: "SUBJECTS_FAILED".to_string(),
                message: format!("{} subjects could not be processed", count),
                hint: Some("Write a --report to see each failure".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ConfigSummary {
    version: String,
    groups: Vec<GroupSummary>,
    versions: Vec<VersionSummary>,
}

#[derive(serde::Serialize)]
struct GroupSummary {
    group: u32,
    redcap_group: u32,
    baseline: usize,
    manipulation: usize,
    near: String,
    far: String,
}

#[derive(serde::Serialize)]
struct VersionSummary {
    version: String,
    passages: usize,
    missing_word_counts: Vec<String>,
}
