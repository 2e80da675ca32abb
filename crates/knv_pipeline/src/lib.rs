//! knv_pipeline — deterministic orchestration of the resolution pipeline.
//!
//! Fixed stage order: ingest -> block -> score (train first under
//! Fellegi-Sunter) -> cluster -> survive -> telemetry. Incremental runs
//! reuse prior cluster state and trained parameters, scoring only pairs
//! that touch new records.
//!
//! The cancellation token is checked at stage boundaries and between EM
//! iterations; a cancelled run returns `EngineError::Cancelled` with no
//! partial result. All outputs are sorted into canonical order before
//! return — two runs with identical inputs yield byte-identical results.

#![forbid(unsafe_code)]

use thiserror::Error;

use knv_core::cancel::CancelToken;
use knv_core::records::NormalizedRecord;
use knv_core::result::{FeedbackLabel, ReconcileResult};
use knv_core::spec::SpecPlan;
use knv_io::source::RowSource;

mod engine;
mod incremental;
mod ingest;

pub use engine::run_full;
pub use incremental::run_incremental;
pub use ingest::ingest_sources;

/// Error taxonomy for a run. Validation accumulates; data-quality problems
/// degrade into telemetry; only spec errors and cancellation abort.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("spec parse error: {0}")]
    SpecParse(String),

    #[error("spec validation failed:\n{}", .0.join("\n"))]
    SpecValidation(Vec<String>),

    #[error("source '{source_name}' is missing declared columns: {}", .missing.join(", "))]
    SourceSchemaMismatch { source_name: String, missing: Vec<String> },

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl From<knv_io::IoError> for EngineError {
    fn from(e: knv_io::IoError) -> Self {
        match e {
            knv_io::IoError::SpecParse(msg) => EngineError::SpecParse(msg),
            other => EngineError::Ingest(other.to_string()),
        }
    }
}

/// Per-run options beyond the spec itself.
#[derive(Clone, Debug)]
pub struct ReconcileOptions {
    /// Labeled pairs from active learning.
    pub feedback: Vec<FeedbackLabel>,
    /// Blending factor for supervised EM, in [0, 1].
    pub learning_rate: f64,
    /// Incremental runs: re-run EM instead of reusing stored parameters.
    pub retrain: bool,
    pub cancel: CancelToken,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            feedback: Vec::new(),
            learning_rate: 0.3,
            retrain: false,
            cancel: CancelToken::new(),
        }
    }
}

/// Full reconciliation over row sources: ingest then run the engine.
pub fn reconcile(
    plan: &SpecPlan,
    spec_hash: &str,
    sources: &[RowSource],
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    let (records, warnings) = ingest_sources(plan, sources)?;
    run_full(plan, spec_hash, records, warnings, options)
}

/// Convenience entry for callers holding raw spec text: parse, validate,
/// compile, hash, then reconcile. Spec problems surface through the error
/// taxonomy (`SpecParse` / `SpecValidation`).
pub fn reconcile_spec_text(
    spec_text: &str,
    sources: &[RowSource],
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    let raw = knv_io::spec_loader::parse_spec(spec_text)?;
    let plan = knv_io::spec_loader::compile_spec(&raw).map_err(EngineError::SpecValidation)?;
    let hash = knv_io::hasher::spec_hash(&raw)
        .map_err(|e| EngineError::Internal(e.to_string()))?;
    reconcile(&plan, &hash, sources, options)
}

/// Full reconciliation over pre-normalized records (the batch format).
pub fn reconcile_records(
    plan: &SpecPlan,
    spec_hash: &str,
    records: Vec<NormalizedRecord>,
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    run_full(plan, spec_hash, records, Vec::new(), options)
}

/// Incremental reconciliation: extend a prior result with a new batch.
pub fn reconcile_incremental(
    plan: &SpecPlan,
    spec_hash: &str,
    previous: &ReconcileResult,
    new_records: Vec<NormalizedRecord>,
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    run_incremental(plan, spec_hash, previous, new_records, options)
}
