//! knv_core — Core types, domains, ordering helpers, and deterministic RNG.
//!
//! This crate is **I/O-free**. It defines stable types/APIs used across the
//! engine (`knv_io`, `knv_algo`, `knv_pipeline`, `knv_report`, `knv_cli`):
//!
//! - Record model: `RecordId`, `SourceRef`, `NormalizedRecord`, `CandidatePair`
//! - Compiled spec plan: comparators, blocking keys, rules, thresholds,
//!   scoring and survivorship configuration
//! - Run outputs: decisions, clusters, golden records, telemetry,
//!   trained Fellegi-Sunter parameters, the `ReconcileResult` bundle
//! - Deterministic ordering helpers
//! - Seedable RNG (ChaCha20) for **u-probability sampling only**
//! - Cooperative cancellation token
//!
//! Serialization derives are gated behind the `serde` feature.

#![forbid(unsafe_code)]

pub mod cancel;
pub mod determinism;
pub mod records;
pub mod result;
pub mod rng;
pub mod spec;

pub mod errors {
    use core::fmt;

    /// Minimal error set for core-domain validation & parsing.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub enum CoreError {
        InvalidId,
        InvalidTimestamp,
        InvalidLabel,
        UnknownComparator(String),
        UnknownStrategy(String),
        UnknownTransform(String),
        DomainOutOfRange(&'static str),
    }

    impl fmt::Display for CoreError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                CoreError::InvalidId => write!(f, "invalid record id"),
                CoreError::InvalidTimestamp => write!(f, "invalid timestamp"),
                CoreError::InvalidLabel => write!(f, "invalid feedback label"),
                CoreError::UnknownComparator(s) => write!(f, "unknown comparator: {s}"),
                CoreError::UnknownStrategy(s) => write!(f, "unknown survivorship strategy: {s}"),
                CoreError::UnknownTransform(s) => write!(f, "unknown blocking transform: {s}"),
                CoreError::DomainOutOfRange(k) => write!(f, "domain out of range: {k}"),
            }
        }
    }

    impl std::error::Error for CoreError {}
}

// Commonly used items (stable symbols used across the workspace)
pub use cancel::CancelToken;
pub use errors::CoreError;
pub use records::{is_missing, CandidatePair, NormalizedRecord, RecordId, SourceRef};
pub use result::{
    Decision, FeedbackKind, FeedbackLabel, FieldScore, GoldenRecord, PairScore, ReconcileResult,
    RuleParams, RuleTelemetry, Telemetry, TrainedFsParams,
};
pub use spec::{
    AgreementLevel, BlockingKey, ComparatorKind, DecisionThresholds, EmConfig, KeyTransform,
    LevelThresholds, MatchRule, ScoringConfig, SeedBlock, SourceSpec, SpecPlan,
    SurvivorshipConfig, SurvivorshipStrategy, LEVEL_COUNT,
};
