//! knv_io — I/O crate for the knv engine.
//!
//! - Shared error type (`IoError`) with `From` conversions used across modules.
//! - Canonical JSON (stable key order) and SHA-256 hashing feed every stable
//!   identifier: the spec hash, record ids, kanoniv ids.
//! - Spec loading: parse → validate (enumerated issues) → compile → plan/diff.
//! - Record batches, ground-truth labels, `.knv` result persistence, and
//!   CSV/JSON row sources.
//!
//! No module here implements resolution semantics; `knv_algo` never does I/O.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Unified error for knv_io (used by canonical_json/spec/batch/persist/source).
#[derive(Debug, Error)]
pub enum IoError {
    /// Filesystem / path errors.
    #[error("io/path error: {0}")]
    Path(String),

    /// Malformed YAML in an identity spec.
    #[error("spec parse error: {0}")]
    SpecParse(String),

    /// JSON serialization/deserialization errors.
    #[error("json error: {0}")]
    Json(String),

    /// CSV read errors.
    #[error("csv error: {0}")]
    Csv(String),

    /// Malformed record batch / labels (bad timestamp, bad id, bad shape).
    #[error("batch error at row {row}: {msg}")]
    Batch { row: usize, msg: String },

    /// `.knv` document problems (unknown version, missing sections).
    #[error("knv document error: {0}")]
    Persist(String),

    /// Generic validation / invariants.
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type IoResult<T> = Result<T, IoError>;

/* ---------------- From conversions (used by file modules) ---------------- */

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Path(e.to_string())
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        IoError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for IoError {
    fn from(e: serde_yaml::Error) -> Self {
        IoError::SpecParse(e.to_string())
    }
}

impl From<csv::Error> for IoError {
    fn from(e: csv::Error) -> Self {
        IoError::Csv(e.to_string())
    }
}

/* ---------------- Public modules (single source of truth) ---------------- */

pub mod batch;
pub mod canonical_json;
pub mod diff;
pub mod hasher;
pub mod persist;
pub mod plan;
pub mod source;
pub mod spec_loader;
pub mod validate;

/* ---------------- Public prelude ---------------- */

pub mod prelude {
    pub use crate::{IoError, IoResult};

    pub use crate::batch::{parse_ground_truth, read_record_batch, write_record_batch};
    pub use crate::canonical_json::{to_canonical_bytes, write_canonical_file};
    pub use crate::diff::{diff_specs, SpecDiff};
    pub use crate::hasher::{kanoniv_id_for, record_id_for, sha256_hex, spec_hash};
    pub use crate::persist::{load_result, save_result};
    pub use crate::plan::{build_plan, PlanResult};
    pub use crate::source::RowSource;
    pub use crate::spec_loader::{compile_spec, parse_spec, RawSpec};
    pub use crate::validate::{validate_spec, Severity, ValidationIssue, ValidationReport};
}
