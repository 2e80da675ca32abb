// crates/knv_cli/src/main.rs
//
// knv CLI entrypoint. Drives the engine end-to-end and writes canonical
// artifacts. Strictly offline & deterministic: no network, no OS RNG in
// the engine; logging verbosity is the only thing the environment drives.
//
// Exit codes: 0 success, 2 validation failure, 3 runtime failure, 4 cancelled.

mod args;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{parse_source_arg, Cli, Command, SourceArg};
use knv_core::cancel::CancelToken;
use knv_core::result::{FeedbackLabel, ReconcileResult};
use knv_io::prelude::*;
use knv_pipeline::{EngineError, ReconcileOptions};

const RESULT_FILE: &str = "result.knv";
const EVALUATION_FILE: &str = "evaluation.json";
const CHANGELOG_FILE: &str = "changelog.json";

const EXIT_OK: u8 = 0;
const EXIT_VALIDATION: u8 = 2;
const EXIT_RUNTIME: u8 = 3;
const EXIT_CANCELLED: u8 = 4;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KNV_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("knv: error: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

fn run(cli: Cli) -> Result<u8, String> {
    match cli.command {
        Command::Validate { spec } => cmd_validate(&spec, cli.quiet),
        Command::Plan { spec } => cmd_plan(&spec),
        Command::Diff { spec_a, spec_b } => cmd_diff(&spec_a, &spec_b),
        Command::Reconcile {
            spec,
            sources,
            batches,
            previous,
            feedback,
            ground_truth,
            out,
            retrain,
            learning_rate,
        } => cmd_reconcile(ReconcileArgs {
            spec,
            sources,
            batches,
            previous,
            feedback,
            ground_truth,
            out,
            retrain,
            learning_rate,
            quiet: cli.quiet,
        }),
    }
}

/// Read and parse a spec file. I/O failures are runtime errors (`Err`);
/// malformed YAML is a validation failure (`Ok(Err(..))`, exit 2).
fn read_spec(path: &Path) -> Result<Result<RawSpec, String>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read spec {}: {e}", path.display()))?;
    Ok(parse_spec(&text).map_err(|e| e.to_string()))
}

fn cmd_validate(path: &Path, quiet: bool) -> Result<u8, String> {
    let raw = match read_spec(path)? {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("knv: {e}");
            return Ok(EXIT_VALIDATION);
        }
    };
    let report = validate_spec(&raw);
    for issue in &report.issues {
        println!("{:?}: {} ({})", issue.severity, issue.message, issue.where_);
    }
    if report.pass {
        if !quiet {
            println!("knv: spec is valid — hash {}", spec_hash(&raw).map_err(|e| e.to_string())?);
        }
        Ok(EXIT_OK)
    } else {
        Ok(EXIT_VALIDATION)
    }
}

fn cmd_plan(path: &Path) -> Result<u8, String> {
    let raw = match read_spec(path)? {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("knv: {e}");
            return Ok(EXIT_VALIDATION);
        }
    };
    let plan = match compile_spec(&raw) {
        Ok(plan) => plan,
        Err(errors) => {
            for e in &errors {
                eprintln!("knv: {e}");
            }
            return Ok(EXIT_VALIDATION);
        }
    };
    let result = build_plan(&raw, &plan).map_err(|e| e.to_string())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?
    );
    eprintln!("{}", result.summary);
    Ok(EXIT_OK)
}

fn cmd_diff(path_a: &Path, path_b: &Path) -> Result<u8, String> {
    let (a, b) = match (read_spec(path_a)?, read_spec(path_b)?) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("knv: {e}");
            return Ok(EXIT_VALIDATION);
        }
    };
    let diff = diff_specs(&a, &b);
    println!("{}", serde_json::to_string_pretty(&diff).map_err(|e| e.to_string())?);
    eprintln!("{}", diff.summary);
    Ok(EXIT_OK)
}

struct ReconcileArgs {
    spec: PathBuf,
    sources: Vec<String>,
    batches: Vec<PathBuf>,
    previous: Option<PathBuf>,
    feedback: Option<PathBuf>,
    ground_truth: Option<PathBuf>,
    out: PathBuf,
    retrain: bool,
    learning_rate: f64,
    quiet: bool,
}

fn cmd_reconcile(args: ReconcileArgs) -> Result<u8, String> {
    let raw = match read_spec(&args.spec)? {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("knv: {e}");
            return Ok(EXIT_VALIDATION);
        }
    };
    let plan = match compile_spec(&raw) {
        Ok(plan) => plan,
        Err(errors) => {
            for e in &errors {
                eprintln!("knv: {e}");
            }
            return Ok(EXIT_VALIDATION);
        }
    };
    let hash = spec_hash(&raw).map_err(|e| e.to_string())?;

    // Ctrl-C flips the engine's cancel token; a second Ctrl-C kills us.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        let _ = ctrlc::set_handler(move || cancel.cancel());
    }

    let feedback: Vec<FeedbackLabel> = match &args.feedback {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read feedback {}: {e}", path.display()))?;
            serde_json::from_str(&text).map_err(|e| format!("bad feedback file: {e}"))?
        }
        None => Vec::new(),
    };

    let options = ReconcileOptions {
        feedback,
        learning_rate: args.learning_rate,
        retrain: args.retrain,
        cancel,
    };

    // Gather inputs: row sources and/or pre-normalized batches.
    let mut row_sources: Vec<RowSource> = Vec::new();
    for raw_arg in &args.sources {
        let SourceArg { name, primary_key, path } = parse_source_arg(raw_arg)?;
        let source = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => RowSource::from_csv_path(&name, &primary_key, &path),
            Some("json") => RowSource::from_json_path(&name, &primary_key, &path),
            _ => return Err(format!("source '{}': expected .csv or .json", path.display())),
        }
        .map_err(|e| e.to_string())?;
        row_sources.push(source);
    }
    let mut batch_records = Vec::new();
    for path in &args.batches {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read batch {}: {e}", path.display()))?;
        batch_records.extend(read_record_batch(&text).map_err(|e| e.to_string())?);
    }

    let previous: Option<ReconcileResult> = match &args.previous {
        Some(path) => Some(load_result(path).map_err(|e| e.to_string())?),
        None => None,
    };

    let outcome = match &previous {
        Some(prior) => {
            let (mut records, _) = knv_pipeline::ingest_sources(&plan, &row_sources)
                .map_err(|e| e.to_string())?;
            records.extend(batch_records);
            knv_pipeline::reconcile_incremental(&plan, &hash, prior, records, options)
        }
        None if row_sources.is_empty() => {
            knv_pipeline::reconcile_records(&plan, &hash, batch_records, options)
        }
        None if batch_records.is_empty() => {
            knv_pipeline::reconcile(&plan, &hash, &row_sources, options)
        }
        None => {
            let (mut records, warnings) = knv_pipeline::ingest_sources(&plan, &row_sources)
                .map_err(|e| e.to_string())?;
            records.extend(batch_records);
            knv_pipeline::run_full(&plan, &hash, records, warnings, options)
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(EngineError::Cancelled) => {
            eprintln!("knv: cancelled");
            return Ok(EXIT_CANCELLED);
        }
        Err(EngineError::SpecValidation(errors)) => {
            for e in &errors {
                eprintln!("knv: {e}");
            }
            return Ok(EXIT_VALIDATION);
        }
        Err(e) => {
            eprintln!("knv: error: {e}");
            return Ok(EXIT_RUNTIME);
        }
    };

    // ---- Persist artifacts ----
    std::fs::create_dir_all(&args.out)
        .map_err(|e| format!("cannot create output directory {}: {e}", args.out.display()))?;
    save_result(&args.out.join(RESULT_FILE), &result).map_err(|e| e.to_string())?;

    let ground_truth = match &args.ground_truth {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read ground truth {}: {e}", path.display()))?;
            Some(parse_ground_truth(&text).map_err(|e| e.to_string())?)
        }
        None => None,
    };
    let evaluation = knv_report::evaluate(&result, ground_truth.as_ref());
    write_canonical_file(&args.out.join(EVALUATION_FILE), &evaluation)
        .map_err(|e| e.to_string())?;

    if let Some(prior) = &previous {
        let changelog = knv_report::compute_changes(prior, &result);
        write_canonical_file(&args.out.join(CHANGELOG_FILE), &changelog)
            .map_err(|e| e.to_string())?;
        if !args.quiet {
            println!("knv: changes — {}", changelog.summary());
        }
    }

    if !args.quiet {
        println!(
            "knv: resolved {} records into {} entities (merge rate {:.1}%)",
            result.records.len(),
            result.cluster_count(),
            result.merge_rate() * 100.0
        );
        println!("{}", evaluation.summary());
        println!("knv: artifacts written to {}", args.out.display());
    }
    Ok(EXIT_OK)
}
