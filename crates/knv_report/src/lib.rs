//! knv_report — pure offline report model over reconciliation results.
//!
//! Determinism rules:
//! - No network, no I/O here. Callers supply results already in-memory.
//! - Stable section order and field names.
//!
//! Two surfaces: `evaluate` (structural / stability / ground-truth
//! metrics) and `changelog` (entity-level changes between two runs).

#![forbid(unsafe_code)]

pub mod changelog;
pub mod evaluate;

pub use changelog::{compute_changes, ChangeKind, ChangeLog, EntityChange};
pub use evaluate::{evaluate, EvaluateResult};
