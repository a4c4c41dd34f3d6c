//! Nudge CLI - Command-line interface for Synheart Nudge
//!
//! Commands:
//! - train: Fit the intervention classifier on a usage CSV and export it
//! - doctor: Check that saved model artifacts load and agree
//! - schema: Print the expected CSV columns or the ONNX interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_nudge::config::{TrainConfig, DEFAULT_MODEL_OUT, DEFAULT_ONNX_OUT};
use synheart_nudge::export::proto::{type_proto, ModelProto};
use synheart_nudge::export::{read_onnx, LABEL_OUTPUT, PROBABILITIES_OUTPUT};
use synheart_nudge::features::DERIVED_FEATURES;
use synheart_nudge::pipeline::{train_from_csv, InterventionPipeline, TrainingReport};
use synheart_nudge::{TrainError, NUDGE_VERSION, PRODUCER_NAME};

/// Nudge - Phone usage intervention classifier
#[derive(Parser)]
#[command(name = "nudge")]
#[command(author = "Synheart AI Inc")]
#[command(version = NUDGE_VERSION)]
#[command(about = "Train and export the phone usage intervention model", long_about = None)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a usage CSV, report held-out accuracy, and write the model files
    Train(TrainArgs),

    /// Diagnose saved model artifacts
    Doctor {
        /// Native model document to check
        #[arg(long)]
        model: Option<PathBuf>,

        /// ONNX model to check
        #[arg(long)]
        onnx: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print schema information
    Schema {
        /// Schema to print (input or output)
        #[arg(value_enum)]
        schema_type: SchemaType,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct TrainArgs {
    /// JSON config file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input CSV path
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Native model output path
    #[arg(long)]
    model_out: Option<PathBuf>,

    /// ONNX model output path
    #[arg(long)]
    onnx_out: Option<PathBuf>,

    /// Skip the ONNX export
    #[arg(long, conflicts_with = "onnx_out")]
    no_onnx: bool,

    /// Timestamp column name
    #[arg(long)]
    datetime_column: Option<String>,

    /// Binary target column name
    #[arg(long)]
    target_column: Option<String>,

    /// Categorical column name
    #[arg(long)]
    category_column: Option<String>,

    /// Replacement for a zero usage denominator
    #[arg(long)]
    zero_guard: Option<f64>,

    /// Held-out fraction
    #[arg(long)]
    test_size: Option<f64>,

    /// Seed for the train/test split
    #[arg(long)]
    split_seed: Option<u64>,

    /// Number of boosting stages
    #[arg(long)]
    n_estimators: Option<usize>,

    /// Boosting learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Maximum tree depth
    #[arg(long)]
    max_depth: Option<usize>,

    /// Seed for the booster's feature shuffles
    #[arg(long)]
    booster_seed: Option<u64>,

    /// Calibration cross-validation folds
    #[arg(long)]
    folds: Option<usize>,

    /// Opset for the default ONNX domain
    #[arg(long)]
    target_opset: Option<i64>,

    /// Output the training report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Clone, ValueEnum)]
enum SchemaType {
    /// Training CSV columns
    Input,
    /// ONNX model interface
    Output,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("{}", render_error(e));
        return ExitCode::FAILURE;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", render_error(e));
            ExitCode::FAILURE
        }
    }
}

/// Install the stderr subscriber; `RUST_LOG` wins over `--verbose`
fn init_logging(verbose: bool) -> Result<(), NudgeCliError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| NudgeCliError::Logging(e.to_string()))
}

fn render_error(e: NudgeCliError) -> String {
    serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
}

fn run(cli: Cli) -> Result<(), NudgeCliError> {
    match cli.command {
        Commands::Train(args) => cmd_train(args),
        Commands::Doctor { model, onnx, json } => {
            cmd_doctor(model.as_deref(), onnx.as_deref(), json)
        }
        Commands::Schema { schema_type, json } => cmd_schema(schema_type, json),
    }
}

fn cmd_train(args: TrainArgs) -> Result<(), NudgeCliError> {
    let config = build_config(&args)?;
    let report = train_from_csv(&config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// Config file (or defaults) with flag overrides applied
fn build_config(args: &TrainArgs) -> Result<TrainConfig, NudgeCliError> {
    let mut config = match &args.config {
        Some(path) => TrainConfig::from_json_file(path)?,
        None => TrainConfig::default(),
    };

    if let Some(input) = &args.input {
        config.input = input.clone();
    }
    if let Some(model_out) = &args.model_out {
        config.model_out = model_out.clone();
    }
    if let Some(onnx_out) = &args.onnx_out {
        config.onnx_out = Some(onnx_out.clone());
    }
    if args.no_onnx {
        config.onnx_out = None;
    }
    if let Some(column) = &args.datetime_column {
        config.dataset.datetime_column = column.clone();
    }
    if let Some(column) = &args.target_column {
        config.dataset.target_column = column.clone();
    }
    if let Some(column) = &args.category_column {
        config.dataset.categorical_column = column.clone();
    }
    if let Some(zero_guard) = args.zero_guard {
        config.features.zero_guard = zero_guard;
    }
    if let Some(test_size) = args.test_size {
        config.split.test_size = test_size;
    }
    if let Some(seed) = args.split_seed {
        config.split.seed = seed;
    }
    if let Some(n) = args.n_estimators {
        config.booster.n_estimators = n;
    }
    if let Some(lr) = args.learning_rate {
        config.booster.learning_rate = lr;
    }
    if let Some(depth) = args.max_depth {
        config.booster.max_depth = depth;
    }
    if let Some(seed) = args.booster_seed {
        config.booster.seed = seed;
    }
    if let Some(folds) = args.folds {
        config.calibration.folds = folds;
    }
    if let Some(opset) = args.target_opset {
        config.onnx.target_opset = opset;
    }

    config.validate()?;
    Ok(config)
}

fn print_report(report: &TrainingReport) {
    println!("Test accuracy: {}", report.test_accuracy);
    println!("Saved trained pipeline to {}", report.model_path.display());
    if let Some(onnx_path) = &report.onnx_path {
        println!("Exported ONNX model to {}", onnx_path.display());
    }
}

fn cmd_doctor(model: Option<&Path>, onnx: Option<&Path>, json: bool) -> Result<(), NudgeCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "nudge_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Nudge version {}", NUDGE_VERSION),
    });

    let mut pipeline = None;
    if let Some(model_path) = model {
        if model_path.exists() {
            match InterventionPipeline::load_json(model_path) {
                Ok(loaded) => {
                    let accuracy = loaded
                        .metadata
                        .test_accuracy
                        .map_or_else(|| "n/a".to_string(), |a| format!("{:.4}", a));
                    checks.push(DoctorCheck {
                        name: "model".to_string(),
                        status: CheckStatus::Ok,
                        message: format!(
                            "Model {} valid ({} folds, test accuracy {})",
                            loaded.metadata.model_id,
                            loaded.classifier.folds.len(),
                            accuracy
                        ),
                    });
                    pipeline = Some(loaded);
                }
                Err(e) => checks.push(DoctorCheck {
                    name: "model".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid model document: {}", e),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "model".to_string(),
                status: CheckStatus::Warning,
                message: "Model file does not exist".to_string(),
            });
        }
    }

    if let Some(onnx_path) = onnx {
        if onnx_path.exists() {
            let check = match read_onnx(onnx_path) {
                Ok(decoded) => check_onnx_interface(&decoded, pipeline.as_ref()),
                Err(e) => DoctorCheck {
                    name: "onnx".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot decode ONNX model: {}", e),
                },
            };
            checks.push(check);
        } else {
            checks.push(DoctorCheck {
                name: "onnx".to_string(),
                status: CheckStatus::Warning,
                message: "ONNX file does not exist".to_string(),
            });
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: NUDGE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Nudge Doctor Report");
        println!("===================");
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
        Err(NudgeCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

/// The ONNX graph must expose the scoring outputs and, when a native model is
/// known, exactly its feature inputs
fn check_onnx_interface(model: &ModelProto, pipeline: Option<&InterventionPipeline>) -> DoctorCheck {
    let error = |message: String| DoctorCheck {
        name: "onnx".to_string(),
        status: CheckStatus::Error,
        message,
    };

    let Some(graph) = model.graph.as_ref() else {
        return error("ONNX model has no graph".to_string());
    };

    let outputs: Vec<&str> = graph.output.iter().map(|o| o.name.as_str()).collect();
    if outputs != [LABEL_OUTPUT, PROBABILITIES_OUTPUT] {
        return error(format!("Unexpected outputs: {:?}", outputs));
    }

    let inputs: Vec<&str> = graph.input.iter().map(|i| i.name.as_str()).collect();
    if let Some(pipeline) = pipeline {
        let mut expected: Vec<&str> = pipeline
            .metadata
            .numeric_features
            .iter()
            .map(String::as_str)
            .collect();
        expected.push(&pipeline.metadata.categorical_feature);
        if inputs != expected {
            return error(format!(
                "ONNX inputs {:?} do not match model features {:?}",
                inputs, expected
            ));
        }
    }

    let untyped = graph.input.iter().find(|i| {
        !matches!(
            i.r#type.as_ref().and_then(|t| t.value.as_ref()),
            Some(type_proto::Value::TensorType(_))
        )
    });
    if let Some(input) = untyped {
        return error(format!("Input {} is not a tensor", input.name));
    }

    DoctorCheck {
        name: "onnx".to_string(),
        status: CheckStatus::Ok,
        message: format!(
            "ONNX model valid ({} inputs, {} nodes, IR version {})",
            inputs.len(),
            graph.node.len(),
            model.ir_version
        ),
    }
}

fn cmd_schema(schema_type: SchemaType, json: bool) -> Result<(), NudgeCliError> {
    let config = TrainConfig::default();
    match schema_type {
        SchemaType::Input => {
            if json {
                println!("{}", input_schema_json(&config));
            } else {
                println!("Input: training CSV with a header row");
                println!();
                println!(
                    "- {}: timestamp (e.g. 2024-01-15 08:30:00)",
                    config.dataset.datetime_column
                );
                println!("- {}: 0/1 target", config.dataset.target_column);
                println!(
                    "- {}: categorical feature (one-hot encoded, unseen values ignored)",
                    config.dataset.categorical_column
                );
                println!(
                    "- {}, {}, {}: counts divided by {} (0 replaced by {})",
                    config.features.unlocks_column,
                    config.features.switches_column,
                    config.features.scroll_column,
                    config.features.usage_column,
                    config.features.zero_guard
                );
                println!("- any other numeric column is used as a feature as-is");
                println!();
                println!("Derived features: {}", DERIVED_FEATURES.join(", "));
            }
        }
        SchemaType::Output => {
            if json {
                println!("{}", output_schema_json(&config));
            } else {
                println!("Output: {} (native) and {} (ONNX)", DEFAULT_MODEL_OUT, DEFAULT_ONNX_OUT);
                println!();
                println!("ONNX inputs:");
                println!("  - one float [N, 1] tensor per numeric feature, named after the column");
                println!(
                    "  - {}: string [N, 1]",
                    config.dataset.categorical_column
                );
                println!("ONNX outputs:");
                println!("  - {}: int64 [N]", LABEL_OUTPUT);
                println!("  - {}: float [N, 2] (no ZipMap)", PROBABILITIES_OUTPUT);
                println!(
                    "Opsets: ai.onnx {}, ai.onnx.ml {}",
                    config.onnx.target_opset, config.onnx.ml_opset
                );
            }
        }
    }
    Ok(())
}

fn input_schema_json(config: &TrainConfig) -> String {
    serde_json::json!({
        "format": "csv",
        "header": true,
        "required": [
            config.dataset.datetime_column,
            config.dataset.target_column,
            config.dataset.categorical_column,
            config.features.unlocks_column,
            config.features.switches_column,
            config.features.scroll_column,
            config.features.usage_column
        ],
        "derived": DERIVED_FEATURES,
        "zero_guard": config.features.zero_guard
    })
    .to_string()
}

fn output_schema_json(config: &TrainConfig) -> String {
    serde_json::json!({
        "inputs": {
            "numeric": { "type": "float", "shape": ["N", 1] },
            "categorical": {
                "name": config.dataset.categorical_column,
                "type": "string",
                "shape": ["N", 1]
            }
        },
        "outputs": [
            { "name": LABEL_OUTPUT, "type": "int64", "shape": ["N"] },
            { "name": PROBABILITIES_OUTPUT, "type": "float", "shape": ["N", 2] }
        ],
        "opset_import": {
            "ai.onnx": config.onnx.target_opset,
            "ai.onnx.ml": config.onnx.ml_opset
        }
    })
    .to_string()
}

// Error types

#[derive(Debug)]
enum NudgeCliError {
    Train(TrainError),
    Json(serde_json::Error),
    Logging(String),
    DoctorFailed,
}

impl From<TrainError> for NudgeCliError {
    fn from(e: TrainError) -> Self {
        NudgeCliError::Train(e)
    }
}

impl From<serde_json::Error> for NudgeCliError {
    fn from(e: serde_json::Error) -> Self {
        NudgeCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<NudgeCliError> for CliError {
    fn from(e: NudgeCliError) -> Self {
        match e {
            NudgeCliError::Train(e) => {
                let (code, hint) = train_error_code(&e);
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            NudgeCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            NudgeCliError::Logging(msg) => CliError {
                code: "LOGGING_ERROR".to_string(),
                message: msg,
                hint: None,
            },
            NudgeCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

fn train_error_code(e: &TrainError) -> (&'static str, &'static str) {
    match e {
        TrainError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
        TrainError::CsvError(_) | TrainError::NumericParseError(_) | TrainError::DateParseError(_) => (
            "PARSE_ERROR",
            "Run 'nudge schema input' for the expected CSV layout",
        ),
        TrainError::JsonError(_) => ("JSON_ERROR", "Check JSON syntax"),
        TrainError::MissingColumn(_) | TrainError::InvalidTarget(_) => (
            "DATA_ERROR",
            "Run 'nudge schema input' for the expected CSV layout",
        ),
        TrainError::InsufficientData(_) => (
            "INSUFFICIENT_DATA",
            "Each class needs enough rows for the split and calibration folds",
        ),
        TrainError::ShapeMismatch(_) | TrainError::NotFitted(_) => (
            "MODEL_ERROR",
            "Retrain the model with this version of nudge",
        ),
        TrainError::ExportError(_) => ("EXPORT_ERROR", "Check the ONNX options"),
        TrainError::ConfigError(_) => ("CONFIG_ERROR", "Fix the configuration value and retry"),
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
