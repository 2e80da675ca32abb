//! Company-name comparator: uppercase/trim, strip a trailing legal
//! suffix, then Jaro-Winkler.
//!
//! The suffix table is an immutable part of the engine.

use crate::ComparatorOutcome;
use knv_core::spec::LevelThresholds;

/// Trailing legal suffixes, matched case-insensitively with an optional
/// trailing period. Longest token wins so "L.L.C." beats "CO".
const SUFFIXES: [&str; 10] = [
    "INCORPORATED",
    "CORPORATION",
    "L.L.C",
    "LIMITED",
    "COMPANY",
    "CORP",
    "INC",
    "LLC",
    "LTD",
    "CO",
];

/// Uppercase, trim, strip one trailing legal suffix.
pub fn normalize(company: &str) -> String {
    let upper = company.trim().to_uppercase();
    for suffix in SUFFIXES {
        for candidate in [format!("{suffix}."), suffix.to_string()] {
            if let Some(stem) = upper.strip_suffix(&candidate) {
                // Must be a separate trailing word, not a substring.
                if stem.ends_with(|c: char| c.is_whitespace()) {
                    let stem = stem.trim_end().trim_end_matches(',').trim_end();
                    if !stem.is_empty() {
                        return stem.to_string();
                    }
                }
            }
        }
    }
    upper
}

pub fn compare(a: &str, b: &str, thresholds: &LevelThresholds) -> ComparatorOutcome {
    let (na, nb) = (normalize(a), normalize(b));
    let score = strsim::jaro_winkler(&na, &nb);
    ComparatorOutcome { score, level: thresholds.bin(score) }
}
