// crates/knv_cli/src/args.rs
//
// CLI argument parsing & validation. Strictly offline: every input is a
// local file, checked for existence up front.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "knv", about = "Identity resolution as code", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress progress output on stdout.
    #[arg(long, global = true)]
    pub quiet: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate an identity spec; exit 2 on any error-severity issue.
    Validate { spec: PathBuf },

    /// Print the structured execution plan for a spec.
    Plan { spec: PathBuf },

    /// Structural diff between two spec versions.
    Diff { spec_a: PathBuf, spec_b: PathBuf },

    /// Run identity resolution over the given sources.
    Reconcile {
        spec: PathBuf,

        /// Row source as NAME=PRIMARY_KEY=PATH (.csv or .json array).
        #[arg(long = "source", value_name = "NAME=PK=PATH")]
        sources: Vec<String>,

        /// Pre-normalized record batch (JSON array of records).
        #[arg(long = "batch", value_name = "PATH")]
        batches: Vec<PathBuf>,

        /// Previous .knv result for an incremental run.
        #[arg(long)]
        previous: Option<PathBuf>,

        /// Feedback labels (JSON array).
        #[arg(long)]
        feedback: Option<PathBuf>,

        /// Ground-truth labels for evaluation.
        #[arg(long)]
        ground_truth: Option<PathBuf>,

        /// Output directory for result.knv and evaluation artifacts.
        #[arg(long, default_value = "out")]
        out: PathBuf,

        /// Re-run EM training instead of reusing stored FS parameters.
        #[arg(long)]
        retrain: bool,

        /// Supervised EM blending factor, in [0, 1].
        #[arg(long, default_value_t = 0.3)]
        learning_rate: f64,
    },
}

/// A parsed `--source` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArg {
    pub name: String,
    pub primary_key: String,
    pub path: PathBuf,
}

/// Parse NAME=PRIMARY_KEY=PATH.
pub fn parse_source_arg(raw: &str) -> Result<SourceArg, String> {
    let mut parts = raw.splitn(3, '=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(pk), Some(path)) if !name.is_empty() && !pk.is_empty() => {
            Ok(SourceArg {
                name: name.to_string(),
                primary_key: pk.to_string(),
                path: PathBuf::from(path),
            })
        }
        _ => Err(format!("--source '{raw}' must be NAME=PRIMARY_KEY=PATH")),
    }
}
