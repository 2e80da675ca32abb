//! Weighted-sum scoring.
//!
//! Per rule: `comparator_score x weight`. Rules where either side is
//! missing are skipped and contribute exactly 0. The total is compared to
//! the decision thresholds.

use knv_core::records::NormalizedRecord;
use knv_core::result::{FieldScore, PairScore};
use knv_core::spec::{AgreementLevel, DecisionThresholds, MatchRule};

use crate::comparators;
use crate::scoring::decide;

pub fn score_pair(
    a: &NormalizedRecord,
    b: &NormalizedRecord,
    rules: &[MatchRule],
    thresholds: &DecisionThresholds,
) -> PairScore {
    let mut per_field = Vec::with_capacity(rules.len());
    let mut total = 0.0;

    for rule in rules {
        let va = a.value(&rule.field);
        let vb = b.value(&rule.field);
        let outcome = match (va, vb) {
            (Some(x), Some(y)) => {
                comparators::compare(rule.comparator, x, y, &rule.thresholds)
            }
            _ => None,
        };
        match outcome {
            Some(out) => {
                let contribution = out.score * rule.weight;
                total += contribution;
                per_field.push(FieldScore {
                    rule: rule.field.clone(),
                    score: contribution,
                    level: out.level,
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
