//! Exact comparator: 1.0 iff equal after lowercase/trim.

use super::exact_outcome;
use crate::ComparatorOutcome;

pub fn compare(a: &str, b: &str) -> ComparatorOutcome {
    exact_outcome(a.trim().to_lowercase() == b.trim().to_lowercase())
}
