// crates/knv_algo/src/lib.rs
#![forbid(unsafe_code)]

//! Algorithm layer for the knv engine. Pure, deterministic, I/O-free;
//! depends only on `knv_core`. The pipeline crate orchestrates these
//! building blocks in the fixed stage order.

use knv_core::spec::{AgreementLevel, LevelThresholds};

// ----------------------------- Comparator outcome -----------------------------

/// Continuous similarity plus its binned agreement level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComparatorOutcome {
    pub score: f64,
    pub level: AgreementLevel,
}

impl ComparatorOutcome {
    fn binned(score: f64, thresholds: &LevelThresholds) -> Self {
        ComparatorOutcome { score, level: thresholds.bin(score) }
    }
}

// ----------------------------- Comparators (public surface) -------------------

pub mod comparators {
    // File modules (actual implementations)
    pub mod company;
    pub mod email;
    pub mod exact;
    pub mod name;
    pub mod phone;

    use super::ComparatorOutcome;
    use knv_core::records::is_missing;
    use knv_core::spec::{AgreementLevel, ComparatorKind, LevelThresholds};

    /// Evaluate one comparator on a pair of raw values.
    ///
    /// Returns `None` when either side is missing (or normalizes to
    /// nothing, e.g. an unparseable phone number): the rule is skipped and
    /// contributes zero, never a penalty.
    pub fn compare(
        kind: ComparatorKind,
        a: &str,
        b: &str,
        thresholds: &LevelThresholds,
    ) -> Option<ComparatorOutcome> {
        if is_missing(a) || is_missing(b) {
            return None;
        }
        match kind {
            ComparatorKind::Exact => Some(exact::compare(a, b)),
            ComparatorKind::JaroWinkler => {
                let score = strsim::jaro_winkler(a.trim(), b.trim());
                Some(ComparatorOutcome::binned(score, thresholds))
            }
            ComparatorKind::Email => email::compare(a, b),
            ComparatorKind::Phone => phone::compare(a, b),
            ComparatorKind::Name => Some(name::compare(a, b, thresholds)),
            ComparatorKind::Company => Some(company::compare(a, b, thresholds)),
        }
    }

    /// Canonical form of a value under a comparator's normalizer, used by
    /// survivorship so golden values match what scoring compared.
    /// Falls back to the trimmed input where no normalizer applies.
    pub fn normalize_for(kind: ComparatorKind, value: &str) -> Option<String> {
        if is_missing(value) {
            return None;
        }
        match kind {
            ComparatorKind::Email => email::normalize(value),
            ComparatorKind::Phone => phone::canonicalize(value),
            ComparatorKind::Name => Some(name::normalize(value)),
            ComparatorKind::Company => Some(company::normalize(value)),
            ComparatorKind::Exact | ComparatorKind::JaroWinkler => {
                Some(value.trim().to_string())
            }
        }
    }

    pub(crate) fn exact_outcome(equal: bool) -> ComparatorOutcome {
        if equal {
            ComparatorOutcome { score: 1.0, level: AgreementLevel::Exact }
        } else {
            ComparatorOutcome { score: 0.0, level: AgreementLevel::Disagree }
        }
    }
}

// ----------------------------- Blocking & scoring -----------------------------

pub mod blocking;

pub mod scoring {
    pub mod em;
    pub mod fellegi_sunter;
    pub mod weighted;

    use knv_core::result::Decision;
    use knv_core::spec::DecisionThresholds;

    /// Map a total score to a decision. `match` iff `total >= match`;
    /// `review` iff `review <= total < match`; else `no_match`.
    pub fn decide(total: f64, thresholds: &DecisionThresholds) -> Decision {
        if total >= thresholds.match_threshold {
            Decision::Match
        } else if total >= thresholds.review_threshold {
            Decision::Review
        } else {
            Decision::NoMatch
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn decision_flips_exactly_at_boundaries() {
            let t = DecisionThresholds {
                match_threshold: 0.85,
                review_threshold: 0.6,
                reject_threshold: 0.3,
            };
            assert_eq!(decide(0.85, &t), Decision::Match);
            assert_eq!(decide(0.8499999, &t), Decision::Review);
            assert_eq!(decide(0.6, &t), Decision::Review);
            assert_eq!(decide(0.5999999, &t), Decision::NoMatch);
        }
    }
}

// ----------------------------- Clustering & survivorship ----------------------

pub mod cluster;
pub mod survivor;

// Tight, explicit re-exports (avoid wildcard export drift).
pub use blocking::{block, BlockedPair, BlockingOutcome};
pub use cluster::{cluster_edges, ClusterOutcome, Clusterer, UnionOutcome};
pub use comparators::{compare, normalize_for};
pub use scoring::decide;
pub use survivor::golden_record;

