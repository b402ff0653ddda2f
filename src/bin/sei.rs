//! SEI CLI - Command-line interface for the SEI non-verbal scoring engine
//!
//! Commands:
//! - evaluate: Score a session recording into a report
//! - config: Print the default configuration or validate one
//! - doctor: Diagnose configuration and environment
//! - schema: Print input/output/config schema information

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sei_nonverbal::config::EngineConfig;
use sei_nonverbal::types::{Report, SessionRecording};
use sei_nonverbal::{score_recording, EvaluationError, ENGINE_VERSION, PRODUCER_NAME, REPORT_VERSION};

/// SEI - Multimodal non-verbal scoring for recorded interviews
#[derive(Parser)]
#[command(name = "sei")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Score face, gaze and voice signals of an interview session", long_about = None)]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. "debug" or "sei_nonverbal=trace"
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a session recording (session + observations JSON)
    Evaluate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Engine configuration file (default configuration when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the segment window width in seconds
        #[arg(long)]
        window_sec: Option<f64>,

        /// Override the outlier threshold in standard deviations
        #[arg(long)]
        outlier_sigma: Option<f64>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        format: OutputFormat,
    },

    /// Print or validate engine configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON schema
        #[arg(long)]
        json_schema: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the default configuration as JSON
    Default,
    /// Validate a configuration file
    Validate {
        /// Configuration file path
        path: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON report
    Json,
    /// Pretty-printed JSON report
    JsonPretty,
    /// Human-readable score summary
    Summary,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Input schema (session recording)
    Input,
    /// Output schema (report)
    Output,
    /// Engine configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

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

fn init_logging(filter: Option<&str>) {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), SeiCliError> {
    match cli.command {
        Commands::Evaluate {
            input,
            output,
            config,
            window_sec,
            outlier_sigma,
            format,
        } => cmd_evaluate(
            &input,
            &output,
            config.as_deref(),
            window_sec,
            outlier_sigma,
            format,
        ),

        Commands::Config { action } => cmd_config(action),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),

        Commands::Schema {
            schema_type,
            json_schema,
        } => cmd_schema(schema_type, json_schema),
    }
}

fn cmd_evaluate(
    input: &Path,
    output: &Path,
    config_path: Option<&Path>,
    window_sec: Option<f64>,
    outlier_sigma: Option<f64>,
    format: OutputFormat,
) -> Result<(), SeiCliError> {
    let mut config = match config_path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(w) = window_sec {
        config.window_sec = w;
    }
    if let Some(sigma) = outlier_sigma {
        config.evidence.outlier_sigma = sigma;
    }

    let input_data = read_input(input)?;
    let recording: SessionRecording = serde_json::from_str(&input_data)
        .map_err(|e| SeiCliError::ParseError(format!("Failed to parse session recording: {}", e)))?;

    // score_recording validates the (possibly overridden) configuration first
    let report = score_recording(&recording, &config)?;

    let output_data = match format {
        OutputFormat::Json => report.to_json()? + "\n",
        OutputFormat::JsonPretty => report.to_json_pretty()? + "\n",
        OutputFormat::Summary => format_summary(&report),
    };

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<(), SeiCliError> {
    match action {
        ConfigAction::Default => {
            println!("{}", EngineConfig::default().to_json()?);
            Ok(())
        }
        ConfigAction::Validate { path } => {
            let config = EngineConfig::from_file(&path)?;
            println!(
                "Configuration valid: {} dimensions, window {} s, calibration {}",
                config.dimensions.len(),
                config.window_sec,
                config.calibration_version
            );
            Ok(())
        }
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), SeiCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Engine version {}", ENGINE_VERSION),
    });

    checks.push(DoctorCheck {
        name: "report_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Report schema: {}", REPORT_VERSION),
    });

    match EngineConfig::default().validate() {
        Ok(()) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Ok,
            message: "Default configuration is valid".to_string(),
        }),
        Err(e) => checks.push(DoctorCheck {
            name: "default_config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        }),
    }

    if let Some(config_path) = config {
        let check = if !config_path.exists() {
            DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            }
        } else {
            match EngineConfig::from_file(config_path) {
                Ok(cfg) if cfg.calibration_version == "uncalibrated" => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Warning,
                    message: "Configuration valid but uses uncalibrated constants".to_string(),
                },
                Ok(cfg) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Configuration valid ({} dimensions, calibration {})",
                        cfg.dimensions.len(),
                        cfg.calibration_version
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: e.to_string(),
                },
            }
        };
        checks.push(check);
    }

    // Check stdin is available (for piped recordings)
    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("SEI Doctor Report");
        println!("=================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SeiCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(schema_type: SchemaType, json_schema: bool) -> Result<(), SeiCliError> {
    match schema_type {
        SchemaType::Input => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&input_json_schema())?);
            } else {
                println!("Input: session recording");
                println!();
                println!("- session: {{ session_id, candidate_id, duration_sec, questions, recorded_at? }}");
                println!("  - questions: [{{ id, start_sec, end_sec }}]");
                println!("- observations: one entry per modality sample");
                println!("  - modality: face | gaze | voice");
                println!("  - timestamp_sec: offset from session start");
                println!("  - measurement: {{ status: present, value, confidence, features? }}");
                println!("                 or {{ status: absent }}");
            }
        }
        SchemaType::Output => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&output_json_schema())?);
            } else {
                println!("Output Schema: {}", REPORT_VERSION);
                println!();
                println!("- producer: {{ name, version }}");
                println!("- session_id, candidate_id, recorded_at?, calibration_version");
                println!("- overall_score: 0-100, weighted mean of defined sub-scores");
                println!("- sub_scores: [{{ dimension, score (null if undefined), weights_used, missing_modalities }}]");
                println!("- questions: per-question breakdown with the same sub-score structure");
                println!("- segments: per-window sub-scores");
                println!("- evidence: [{{ segment_index, modality, value, session_mean, z_score, deviation }}]");
                println!("- quality: {{ window_sec, segment_count, absent_modalities, undefined_dimensions, modality_coverage }}");
            }
        }
        SchemaType::Config => {
            if json_schema {
                println!("{}", serde_json::to_string_pretty(&config_json_schema())?);
            } else {
                println!("Engine configuration (see 'sei config default')");
                println!();
                println!("- window_sec: segment width in seconds (> 0)");
                println!("- aggregation: {{ decay in [0, 1), min_confidence in [0, 1] }}");
                println!("- dimensions: [{{ name, weight, modalities: [{{ modality, weight }}], calibration: {{ scale, offset }} }}]");
                println!("- calibration_version: tag echoed into every report");
                println!("- evidence: {{ outlier_sigma }}");
                println!("- perception: {{ workers_per_modality, queue_capacity, max_chunk_bytes, contracts }}");
            }
        }
    }
    Ok(())
}

// Helper functions

fn read_input(input: &Path) -> Result<String, SeiCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn format_score(score: Option<f64>) -> String {
    match score {
        Some(s) => format!("{:6.1}", s),
        None => " undef".to_string(),
    }
}

fn format_summary(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session {} (candidate {})\n", report.session_id, report.candidate_id));
    out.push_str(&format!("Overall score: {:.1}\n", report.overall_score));
    out.push_str(&format!("Calibration:   {}\n\n", report.calibration_version));

    out.push_str("Dimensions:\n");
    for sub in &report.sub_scores {
        out.push_str(&format!("  {:<14} {}\n", sub.dimension, format_score(sub.score)));
    }

    if !report.questions.is_empty() {
        out.push_str("\nQuestions:\n");
        for question in &report.questions {
            out.push_str(&format!(
                "  {:<14} {}  ({} segments, {} evidence)\n",
                question.question_id,
                format_score(question.overall_score),
                question.segment_indices.len(),
                question.evidence.len()
            ));
        }
    }

    if !report.evidence.is_empty() {
        out.push_str("\nEvidence:\n");
        for e in &report.evidence {
            out.push_str(&format!(
                "  {:>7.1}s-{:<7.1}s {:<6} z={:+.2}\n",
                e.start_sec, e.end_sec, e.modality, e.z_score
            ));
        }
    }

    if !report.quality.absent_modalities.is_empty() {
        let absent: Vec<&str> = report.quality.absent_modalities.iter().map(|m| m.as_str()).collect();
        out.push_str(&format!("\nAbsent modalities: {}\n", absent.join(", ")));
    }
    out
}

fn input_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Session recording",
        "type": "object",
        "required": ["session"],
        "properties": {
            "session": {
                "type": "object",
                "required": ["session_id", "candidate_id", "duration_sec"],
                "properties": {
                    "session_id": { "type": "string" },
                    "candidate_id": { "type": "string" },
                    "duration_sec": { "type": "number", "exclusiveMinimum": 0 },
                    "recorded_at": { "type": "string", "format": "date-time" },
                    "questions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["id", "start_sec", "end_sec"],
                            "properties": {
                                "id": { "type": "string" },
                                "start_sec": { "type": "number" },
                                "end_sec": { "type": "number" }
                            }
                        }
                    }
                }
            },
            "observations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["modality", "timestamp_sec", "measurement"],
                    "properties": {
                        "modality": { "enum": ["face", "gaze", "voice"] },
                        "timestamp_sec": { "type": "number" },
                        "measurement": {
                            "type": "object",
                            "required": ["status"],
                            "properties": {
                                "status": { "enum": ["present", "absent"] },
                                "value": { "type": "number", "minimum": 0, "maximum": 1 },
                                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                                "features": { "type": "array", "items": { "type": "number" } }
                            }
                        }
                    }
                }
            }
        }
    })
}

fn output_json_schema() -> serde_json::Value {
    let sub_score = serde_json::json!({
        "type": "object",
        "required": ["dimension", "score", "weights_used"],
        "properties": {
            "dimension": { "type": "string" },
            "score": { "type": ["number", "null"], "minimum": 0, "maximum": 100 },
            "weights_used": { "type": "object", "additionalProperties": { "type": "number" } },
            "missing_modalities": { "type": "array", "items": { "type": "string" } }
        }
    });

    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": REPORT_VERSION,
        "type": "object",
        "required": ["report_version", "producer", "session_id", "candidate_id",
                     "calibration_version", "overall_score", "sub_scores",
                     "questions", "segments", "evidence", "quality"],
        "properties": {
            "report_version": { "const": REPORT_VERSION },
            "overall_score": { "type": "number", "minimum": 0, "maximum": 100 },
            "sub_scores": { "type": "array", "items": sub_score },
            "questions": { "type": "array" },
            "segments": { "type": "array" },
            "evidence": { "type": "array" },
            "quality": { "type": "object" }
        }
    })
}

fn config_json_schema() -> serde_json::Value {
    serde_json::json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Engine configuration",
        "type": "object",
        "required": ["window_sec", "aggregation", "dimensions", "calibration_version", "evidence"],
        "properties": {
            "window_sec": { "type": "number", "exclusiveMinimum": 0 },
            "aggregation": {
                "type": "object",
                "properties": {
                    "decay": { "type": "number", "minimum": 0, "exclusiveMaximum": 1 },
                    "min_confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                }
            },
            "dimensions": { "type": "array", "minItems": 1 },
            "calibration_version": { "type": "string", "minLength": 1 },
            "evidence": {
                "type": "object",
                "properties": { "outlier_sigma": { "type": "number", "exclusiveMinimum": 0 } }
            },
            "perception": { "type": "object" }
        }
    })
}

// Error handling

#[derive(Debug)]
enum SeiCliError {
    Io(io::Error),
    Evaluation(EvaluationError),
    Json(serde_json::Error),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for SeiCliError {
    fn from(e: io::Error) -> Self {
        SeiCliError::Io(e)
    }
}

impl From<EvaluationError> for SeiCliError {
    fn from(e: EvaluationError) -> Self {
        SeiCliError::Evaluation(e)
    }
}

impl From<serde_json::Error> for SeiCliError {
    fn from(e: serde_json::Error) -> Self {
        SeiCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

fn evaluation_error_code(e: &EvaluationError) -> &'static str {
    match e {
        EvaluationError::PerceptionUnavailable { .. } => "PERCEPTION_UNAVAILABLE",
        EvaluationError::ContractViolation { .. } => "CONTRACT_VIOLATION",
        EvaluationError::InsufficientSignal { .. } => "INSUFFICIENT_SIGNAL",
        EvaluationError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        EvaluationError::InvalidSession(_) => "INVALID_SESSION",
        EvaluationError::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
        EvaluationError::Cancelled => "CANCELLED",
        EvaluationError::ParseError(_) | EvaluationError::JsonError(_) => "PARSE_ERROR",
        EvaluationError::EncodingError(_) => "ENCODING_ERROR",
    }
}

impl From<SeiCliError> for CliError {
    fn from(e: SeiCliError) -> Self {
        match e {
            SeiCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SeiCliError::Evaluation(e) => {
                let hint = match &e {
                    EvaluationError::ConfigurationError(_) => {
                        "Run 'sei config validate <file>' or 'sei schema config'"
                    }
                    EvaluationError::InvalidSession(_) | EvaluationError::ParseError(_) => {
                        "Ensure input matches 'sei schema input'"
                    }
                    EvaluationError::InsufficientSignal { .. } => {
                        "No modality carried usable signal; no report was produced"
                    }
                    _ if e.is_session_failure() => "Session evaluation failed; no report was produced",
                    _ => "Check input and configuration",
                };
                CliError {
                    code: evaluation_error_code(&e).to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            SeiCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SeiCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            SeiCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Ensure input matches 'sei schema input'".to_string()),
            },
        }
    }
}

// Report types

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
