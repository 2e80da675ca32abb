//! Fellegi-Sunter scoring.
//!
//! Each rule's comparator emits an agreement level; the pair score is the
//! sum of `log2(m / u)` at the observed levels. Rules with a missing side
//! are skipped: `log2(1) = 0`, the model's defining property. Decision
//! thresholds are interpreted in the log2 domain.

use knv_core::records::NormalizedRecord;
use knv_core::result::{FieldScore, PairScore, TrainedFsParams};
use knv_core::spec::{AgreementLevel, DecisionThresholds, MatchRule};

use crate::comparators;
use crate::scoring::decide;

/// Probability floor; keeps log-weights finite.
pub const PROB_FLOOR: f64 = 1e-6;

/// Agreement level of each rule for one pair; `None` where either side is
/// missing. Shared by scoring and EM training.
pub fn rule_levels(
    a: &NormalizedRecord,
    b: &NormalizedRecord,
    rules: &[MatchRule],
) -> Vec<Option<AgreementLevel>> {
    rules
        .iter()
        .map(|rule| {
            let va = a.value(&rule.field)?;
            let vb = b.value(&rule.field)?;
            comparators::compare(rule.comparator, va, vb, &rule.thresholds).map(|o| o.level)
        })
        .collect()
}

/// Log2 match weight for one (rule, level) cell.
pub fn log2_weight(m: f64, u: f64) -> f64 {
    (m.max(PROB_FLOOR) / u.max(PROB_FLOOR)).log2()
}

pub fn score_pair(
    a: &NormalizedRecord,
    b: &NormalizedRecord,
    rules: &[MatchRule],
    params: &TrainedFsParams,
    thresholds: &DecisionThresholds,
) -> PairScore {
    debug_assert_eq!(params.rules.len(), rules.len(), "fs params not aligned with rules");

    let levels = rule_levels(a, b, rules);
    let mut per_field = Vec::with_capacity(rules.len());
    let mut total = 0.0;

    for (i, rule) in rules.iter().enumerate() {
        match levels[i] {
            Some(level) => {
                let cell = level.index();
                let w = log2_weight(params.rules[i].m[cell], params.rules[i].u[cell]);
                total += w;
                per_field.push(FieldScore {
                    rule: rule.field.clone(),
                    score: w,
                    level,
                    skipped: false,
                });
            }
            None => per_field.push(FieldScore {
                rule: rule.field.clone(),
                score: 0.0,
                level: AgreementLevel::Disagree,
                skipped: true,
            }),
        }
    }

    let (lo, hi) = if a.id <= b.id { (a.id, b.id) } else { (b.id, a.id) };
    PairScore { a: lo, b: hi, per_field, total, decision: decide(total, thresholds) }
}
