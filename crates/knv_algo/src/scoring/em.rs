//! Fellegi-Sunter parameter estimation.
//!
//! Training order (u is never re-estimated by EM):
//! 1. u-probabilities from seeded random pair sampling (no blocking);
//! 2. lambda from an optional seed blocking rule at a declared recall;
//! 3. m-probabilities via expectation-maximization over blocked pairs,
//!    holding u fixed, with optional supervised soft assignments.
//!
//! The sampler RNG is seeded from the spec hash and the iteration order is
//! fixed, so training is a pure function of (spec, records, feedback).

use std::collections::BTreeMap;

use knv_core::cancel::CancelToken;
use knv_core::records::NormalizedRecord;
use knv_core::rng::SamplerRng;
use knv_core::spec::{EmConfig, MatchRule, LEVEL_COUNT};

use super::fellegi_sunter::{rule_levels, PROB_FLOOR};

/// Starting m table before EM refinement.
pub fn default_m() -> [f64; LEVEL_COUNT] {
    [0.90, 0.05, 0.03, 0.02]
}

/// Fallback u table when sampling finds no comparable pairs.
pub fn default_u() -> [f64; LEVEL_COUNT] {
    [0.05, 0.10, 0.15, 0.70]
}

/// Estimate per-rule u-probabilities from random pairs.
///
/// When the full cross-product fits inside `max_sample_pairs` every pair is
/// enumerated; otherwise `max_sample_pairs` draws come from the seeded RNG.
/// Records must be in id order so the draw sequence is canonical.
pub fn estimate_u(
    records: &[NormalizedRecord],
    rules: &[MatchRule],
    rng: &mut SamplerRng,
    max_sample_pairs: usize,
) -> Vec<[f64; LEVEL_COUNT]> {
    let n = records.len();
    let mut counts = vec![[0u64; LEVEL_COUNT]; rules.len()];

    let total_pairs = if n < 2 { 0 } else { n * (n - 1) / 2 };
    if total_pairs == 0 {
        return vec![default_u(); rules.len()];
    }

    let mut tally = |a: &NormalizedRecord, b: &NormalizedRecord| {
        for (r, level) in rule_levels(a, b, rules).into_iter().enumerate() {
            if let Some(level) = level {
                counts[r][level.index()] += 1;
            }
        }
    };

    if total_pairs <= max_sample_pairs {
        for i in 0..n {
            for j in (i + 1)..n {
                tally(&records[i], &records[j]);
            }
        }
    } else {
        let mut drawn = 0usize;
        while drawn < max_sample_pairs {
            let i = rng.index(n as u64).unwrap_or(0) as usize;
            let j = rng.index(n as u64).unwrap_or(0) as usize;
            if i == j {
                continue;
            }
            tally(&records[i.min(j)], &records[i.max(j)]);
            drawn += 1;
        }
    }

    counts
        .into_iter()
        .map(|row| {
            let total: u64 = row.iter().sum();
            if total == 0 {
                return default_u();
            }
            let mut u = [0.0; LEVEL_COUNT];
            for (cell, count) in u.iter_mut().zip(row) {
                *cell = (count as f64 / total as f64).max(PROB_FLOOR);
            }
            u
        })
        .collect()
}

/// Lambda from a seed blocking rule: pairs captured by the seed key are
/// assumed to cover `recall` of all true matches.
pub fn estimate_lambda(
    seed_pair_count: u64,
    total_records: usize,
    recall: f64,
    fallback: f64,
) -> f64 {
    if total_records < 2 || recall <= 0.0 {
        return fallback;
    }
    let total_pairs = (total_records as f64) * (total_records as f64 - 1.0) / 2.0;
    let expected_matches = seed_pair_count as f64 / recall;
    (expected_matches / total_pairs).clamp(1e-7, 0.5)
}

/// Supervised soft assignment for a pair: 1.0 = match, 0.0 = no-match.
pub type SupervisedLabels = BTreeMap<usize, f64>;

#[derive(Clone, Debug, PartialEq)]
pub struct TrainOutcome {
    pub m: Vec<[f64; LEVEL_COUNT]>,
    pub converged: bool,
    pub iterations: usize,
}

/// EM was interrupted between iterations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TrainCancelled;

/// Estimate m-probabilities by EM over blocked candidate pairs, holding u
/// fixed. `pair_levels[p][r]` is the level index of rule `r` for pair `p`
/// (`None` where the rule was skipped). Labeled pairs blend into the
/// posterior with the supervised learning rate.
pub fn train_m(
    pair_levels: &[Vec<Option<usize>>],
    u: &[[f64; LEVEL_COUNT]],
    lambda: f64,
    supervised: &SupervisedLabels,
    learning_rate: f64,
    cfg: &EmConfig,
    cancel: &CancelToken,
) -> Result<TrainOutcome, TrainCancelled> {
    let rule_count = u.len();
    let mut m = vec![default_m(); rule_count];

    if pair_levels.is_empty() || rule_count == 0 {
        return Ok(TrainOutcome { m, converged: true, iterations: 0 });
    }

    let lambda = lambda.clamp(1e-7, 1.0 - 1e-7);
    let mut converged = false;
    let mut iterations = 0;

    for _ in 0..cfg.max_iterations {
        if cancel.is_cancelled() {
            return Err(TrainCancelled);
        }
        iterations += 1;

        // E-step: posterior match probability per pair.
        // M-step accumulators: weighted level counts per (rule, level).
        let mut weighted = vec![[0.0f64; LEVEL_COUNT]; rule_count];
        let mut denominators = vec![0.0f64; rule_count];

        for (p, levels) in pair_levels.iter().enumerate() {
            let mut prod_m = lambda;
            let mut prod_u = 1.0 - lambda;
            for (r, level) in levels.iter().enumerate() {
                if let Some(cell) = level {
                    prod_m *= m[r][*cell].max(PROB_FLOOR);
                    prod_u *= u[r][*cell].max(PROB_FLOOR);
                }
            }
            let posterior = prod_m / (prod_m + prod_u);
            let weight = match supervised.get(&p) {
                Some(label) => learning_rate * label + (1.0 - learning_rate) * posterior,
                None => posterior,
            };

            for (r, level) in levels.iter().enumerate() {
                if let Some(cell) = level {
                    weighted[r][*cell] += weight;
                    denominators[r] += weight;
                }
            }
        }

        // M-step: normalize weighted counts into the new m table.
        let mut delta: f64 = 0.0;
        for r in 0..rule_count {
            if denominators[r] <= 0.0 {
                continue;
            }
            let mut row = [0.0f64; LEVEL_COUNT];
            let mut row_sum = 0.0;
            for cell in 0..LEVEL_COUNT {
                row[cell] = (weighted[r][cell] / denominators[r]).max(PROB_FLOOR);
                row_sum += row[cell];
            }
            for (cell, value) in row.iter_mut().enumerate() {
                *value /= row_sum;
                delta = delta.max((*value - m[r][cell]).abs());
            }
            m[r] = row;
        }

        if delta < cfg.tolerance {
            converged = true;
            break;
        }
    }

    Ok(TrainOutcome { m, converged, iterations })
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::spec::AgreementLevel;

    fn cfg() -> EmConfig {
        EmConfig::default()
    }

    #[test]
    fn lambda_estimate_is_clamped_and_scaled() {
        // 10 seed pairs at 0.8 recall over C(100, 2) pairs.
        let lambda = estimate_lambda(10, 100, 0.8, 0.01);
        let expected = (10.0 / 0.8) / 4950.0;
        assert!((lambda - expected).abs() < 1e-12);
        assert_eq!(estimate_lambda(0, 1, 0.8, 0.01), 0.01);
    }

    #[test]
    fn em_separates_matching_and_random_pairs() {
        // 20 pairs agreeing exactly on both rules, 80 disagreeing on both.
        let exact = AgreementLevel::Exact.index();
        let disagree = AgreementLevel::Disagree.index();
        let mut pairs = Vec::new();
        for _ in 0..20 {
            pairs.push(vec![Some(exact), Some(exact)]);
        }
        for _ in 0..80 {
            pairs.push(vec![Some(disagree), Some(disagree)]);
        }
        let u = vec![[0.02, 0.05, 0.13, 0.80]; 2];

        let out = train_m(
            &pairs,
            &u,
            0.2,
            &SupervisedLabels::new(),
            0.3,
            &cfg(),
            &CancelToken::new(),
        )
        .expect("not cancelled");

        assert!(out.converged, "EM should converge on separable data");
        for r in 0..2 {
            assert!(out.m[r][exact] > 0.9, "m[{r}][exact] = {}", out.m[r][exact]);
            assert!(out.m[r][disagree] < 0.1);
        }
    }

    #[test]
    fn supervised_labels_pull_the_posterior() {
        let exact = AgreementLevel::Exact.index();
        let disagree = AgreementLevel::Disagree.index();
        // One ambiguous pair shape: exact on rule 0, disagree on rule 1.
        let pairs = vec![vec![Some(exact), Some(disagree)]; 10];
        let u = vec![[0.02, 0.05, 0.13, 0.80]; 2];

        let unsupervised = train_m(
            &pairs, &u, 0.5, &SupervisedLabels::new(), 0.3, &cfg(), &CancelToken::new(),
        )
        .unwrap();

        let mut labels = SupervisedLabels::new();
        for p in 0..10 {
            labels.insert(p, 1.0);
        }
        let supervised =
            train_m(&pairs, &u, 0.5, &labels, 1.0, &cfg(), &CancelToken::new()).unwrap();

        // Full-trust match labels force the disagree cell of rule 1 toward 1.
        assert!(supervised.m[1][disagree] >= unsupervised.m[1][disagree]);
    }

    #[test]
    fn cancellation_stops_training() {
        let token = CancelToken::new();
        token.cancel();
        let pairs = vec![vec![Some(0)]];
        let u = vec![default_u()];
        let err = train_m(&pairs, &u, 0.1, &SupervisedLabels::new(), 0.3, &cfg(), &token);
        assert_eq!(err, Err(TrainCancelled));
    }

    #[test]
    fn empty_input_returns_defaults() {
        let out = train_m(
            &[],
            &[default_u()],
            0.1,
            &SupervisedLabels::new(),
            0.3,
            &cfg(),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(out.m, vec![default_m()]);
        assert!(out.converged);
    }
}
