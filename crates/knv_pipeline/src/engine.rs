//! Full-run engine: the fixed stage order over a materialized record set.
//!
//! Shared helpers here are also used by the incremental path; both funnel
//! through `assemble_result` so canonical ordering is enforced in one
//! place.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use knv_algo::blocking::{block, BlockedPair};
use knv_algo::cluster::cluster_edges;
use knv_algo::scoring::em::{self, SupervisedLabels};
use knv_algo::scoring::{fellegi_sunter, weighted};
use knv_algo::survivor;
use knv_core::cancel::CancelToken;
use knv_core::determinism::{sort_decisions, sort_records_by_id};
use knv_core::records::{CandidatePair, NormalizedRecord, RecordId, SourceRef};
use knv_core::result::{
    Decision, FeedbackKind, FeedbackLabel, GoldenRecord, PairScore, ReconcileResult, RuleParams,
    RuleTelemetry, Telemetry, TrainedFsParams,
};
use knv_core::rng::SamplerRng;
use knv_core::spec::{AgreementLevel, ComparatorKind, ScoringConfig, SpecPlan};
use knv_io::hasher::kanoniv_id_for;

use crate::{EngineError, ReconcileOptions};

pub(crate) fn check_cancel(cancel: &CancelToken) -> Result<(), EngineError> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Feedback labels resolved into record-id space. Labels naming records
/// outside the run are ignored.
pub(crate) struct FeedbackEdges {
    pub force: Vec<(RecordId, RecordId)>,
    pub forbid: Vec<(RecordId, RecordId)>,
    /// Soft EM assignment per canonical pair: 1.0 match, 0.0 no-match.
    pub labels: BTreeMap<CandidatePair, f64>,
}

pub(crate) fn resolve_feedback(
    feedback: &[FeedbackLabel],
    records: &[NormalizedRecord],
) -> FeedbackEdges {
    let by_ref: BTreeMap<SourceRef, RecordId> =
        records.iter().map(|r| (r.source_ref(), r.id)).collect();

    let mut force = Vec::new();
    let mut forbid = Vec::new();
    let mut labels = BTreeMap::new();

    for label in feedback {
        let (Some(&a), Some(&b)) = (by_ref.get(&label.ref_a()), by_ref.get(&label.ref_b()))
        else {
            continue;
        };
        let Some(pair) = CandidatePair::new(a, b) else { continue };
        match label.label {
            FeedbackKind::Match => {
                force.push((pair.a, pair.b));
                labels.insert(pair, 1.0);
            }
            FeedbackKind::NoMatch => {
                forbid.push((pair.a, pair.b));
                labels.insert(pair, 0.0);
            }
        }
    }
    FeedbackEdges { force, forbid, labels }
}

/// Train Fellegi-Sunter parameters for this record set.
/// Returns the parameters and whether EM converged.
pub(crate) fn train_fs(
    plan: &SpecPlan,
    spec_hash: &str,
    records: &[NormalizedRecord],
    records_by_id: &BTreeMap<RecordId, &NormalizedRecord>,
    blocked: &[BlockedPair],
    labels: &BTreeMap<CandidatePair, f64>,
    learning_rate: f64,
    cancel: &CancelToken,
) -> Result<(TrainedFsParams, bool), EngineError> {
    let ScoringConfig::FellegiSunter(em_cfg) = &plan.scoring else {
        return Err(EngineError::Internal("train_fs called under weighted_sum".into()));
    };
    if !(0.0..=1.0).contains(&learning_rate) {
        return Err(EngineError::Training(format!(
            "learning_rate {learning_rate} must lie in [0, 1]"
        )));
    }

    // 1. u from seeded random sampling (no blocking).
    let mut rng = SamplerRng::from_hash_hex(spec_hash);
    let u = em::estimate_u(records, &plan.rules, &mut rng, em_cfg.max_sample_pairs);

    // 2. lambda, optionally anchored to a seed blocking rule.
    let lambda = match em_cfg.seed_block {
        Some(seed) => {
            let key = plan
                .blocking
                .get(seed.key_index)
                .ok_or_else(|| EngineError::Internal("seed_block out of range".into()))?;
            let seeded = block(records, std::slice::from_ref(key), plan.skew_limit);
            em::estimate_lambda(
                seeded.pairs.len() as u64,
                records.len(),
                seed.recall,
                em_cfg.initial_lambda,
            )
        }
        None => em_cfg.initial_lambda,
    };

    // 3. m via EM over blocked pairs, u held fixed.
    let pair_levels: Vec<Vec<Option<usize>>> = blocked
        .par_iter()
        .map(|bp| {
            let a = records_by_id[&bp.pair.a];
            let b = records_by_id[&bp.pair.b];
            fellegi_sunter::rule_levels(a, b, &plan.rules)
                .into_iter()
                .map(|level| level.map(|l| l.index()))
                .collect()
        })
        .collect();

    let supervised: SupervisedLabels = blocked
        .iter()
        .enumerate()
        .filter_map(|(i, bp)| labels.get(&bp.pair).map(|&label| (i, label)))
        .collect();

    let outcome = em::train_m(
        &pair_levels,
        &u,
        lambda,
        &supervised,
        learning_rate,
        em_cfg,
        cancel,
    )
    .map_err(|_| EngineError::Cancelled)?;

    debug!(iterations = outcome.iterations, converged = outcome.converged, "EM finished");

    let rules = plan
        .rules
        .iter()
        .enumerate()
        .map(|(i, rule)| RuleParams { rule: rule.field.clone(), m: outcome.m[i], u: u[i] })
        .collect();

    Ok((TrainedFsParams { lambda, rules }, outcome.converged))
}

/// Score candidate pairs in parallel; the indexed iterator keeps output in
/// input order, so results match the sequential evaluation byte-for-byte.
pub(crate) fn score_pairs(
    plan: &SpecPlan,
    records_by_id: &BTreeMap<RecordId, &NormalizedRecord>,
    blocked: &[BlockedPair],
    trained: Option<&TrainedFsParams>,
) -> Vec<PairScore> {
    let mut decisions: Vec<PairScore> = blocked
        .par_iter()
        .map(|bp| {
            let a = records_by_id[&bp.pair.a];
            let b = records_by_id[&bp.pair.b];
            match trained {
                Some(params) => {
                    fellegi_sunter::score_pair(a, b, &plan.rules, params, &plan.decision)
                }
                None => weighted::score_pair(a, b, &plan.rules, &plan.decision),
            }
        })
        .collect();
    sort_decisions(&mut decisions);
    decisions
}

/// Per-rule stats in spec rule order.
pub(crate) fn rule_telemetry(plan: &SpecPlan, decisions: &[PairScore]) -> Vec<RuleTelemetry> {
    let mut stats: Vec<RuleTelemetry> = plan
        .rules
        .iter()
        .map(|r| RuleTelemetry { rule: r.field.clone(), ..Default::default() })
        .collect();
    let mut sums = vec![0.0f64; plan.rules.len()];

    for decision in decisions {
        for (i, field) in decision.per_field.iter().enumerate() {
            if i >= stats.len() {
                break;
            }
            if field.skipped {
                stats[i].skipped += 1;
            } else {
                stats[i].evaluated += 1;
                sums[i] += field.score;
                if field.level == AgreementLevel::Exact {
                    stats[i].matched += 1;
                }
            }
        }
    }
    for (stat, sum) in stats.iter_mut().zip(sums) {
        stat.avg_score = if stat.evaluated > 0 { sum / stat.evaluated as f64 } else { 0.0 };
    }
    stats
}

/// Field -> comparator map used to canonicalize surviving values.
pub(crate) fn normalizers(plan: &SpecPlan) -> BTreeMap<String, ComparatorKind> {
    let mut map = BTreeMap::new();
    for rule in &plan.rules {
        map.entry(rule.field.clone()).or_insert(rule.comparator);
    }
    map
}

/// Build golden records for clusters, reusing prior goldens for clusters
/// whose membership (hence kanoniv id) is unchanged.
pub(crate) fn build_golden_records(
    plan: &SpecPlan,
    clusters: &[Vec<RecordId>],
    records_by_id: &BTreeMap<RecordId, &NormalizedRecord>,
    prior: Option<&BTreeMap<String, GoldenRecord>>,
) -> Vec<GoldenRecord> {
    let field_normalizers = normalizers(plan);
    clusters
        .iter()
        .map(|cluster| {
            let members: Vec<&NormalizedRecord> =
                cluster.iter().map(|id| records_by_id[id]).collect();
            let refs: Vec<SourceRef> = members.iter().map(|m| m.source_ref()).collect();
            let kanoniv_id = kanoniv_id_for(&refs);
            if let Some(prior_golden) = prior.and_then(|p| p.get(&kanoniv_id)) {
                return prior_golden.clone();
            }
            survivor::golden_record(&members, &plan.survivorship, &field_normalizers, kanoniv_id)
        })
        .collect()
}

/// Everything `assemble_result` needs beyond the raw stage outputs.
pub(crate) struct AssembleInputs<'a> {
    pub plan: &'a SpecPlan,
    pub spec_hash: &'a str,
    pub records: Vec<NormalizedRecord>,
    pub decisions: Vec<PairScore>,
    pub clusters: Vec<Vec<RecordId>>,
    pub blocking_groups: u64,
    pub skewed_groups: Vec<String>,
    pub max_shared_keys: u32,
    pub blocked_unions: u64,
    pub conflicting_feedback: u64,
    pub trained: Option<TrainedFsParams>,
    pub em_converged: bool,
    pub feedback: Vec<FeedbackLabel>,
    pub health_flags: Vec<String>,
}

/// Final assembly: telemetry, entity map, canonical ordering.
pub(crate) fn assemble_result(inputs: AssembleInputs<'_>) -> ReconcileResult {
    let AssembleInputs {
        plan,
        spec_hash,
        mut records,
        mut decisions,
        clusters,
        blocking_groups,
        skewed_groups,
        max_shared_keys,
        blocked_unions,
        conflicting_feedback,
        trained,
        em_converged,
        feedback,
        mut health_flags,
    } = inputs;

    sort_records_by_id(&mut records);
    sort_decisions(&mut decisions);

    let mut decisions_by_type: BTreeMap<String, u64> = BTreeMap::new();
    for d in &decisions {
        *decisions_by_type.entry(d.decision.as_str().to_string()).or_insert(0) += 1;
    }

    if decisions.is_empty() {
        health_flags.push("no_candidate_pairs".to_string());
    }
    if !skewed_groups.is_empty() {
        health_flags.push(format!("blocking_skew: {} group(s)", skewed_groups.len()));
    }
    if !em_converged {
        health_flags.push("em_not_converged".to_string());
    }
    if blocked_unions > 0 {
        health_flags.push(format!("forbidden_unions_blocked: {blocked_unions}"));
    }
    if conflicting_feedback > 0 {
        health_flags.push(format!("conflicting_feedback: {conflicting_feedback}"));
    }
    health_flags.sort();
    health_flags.dedup();

    let telemetry = Telemetry {
        pairs_evaluated: decisions.len() as u64,
        decisions_by_type,
        blocking_groups,
        skewed_groups,
        max_shared_keys,
        rule_telemetry: rule_telemetry(plan, &decisions),
        scoring_method: plan.scoring.method_name().to_string(),
        merge_threshold: plan.decision.match_threshold,
        health_flags,
    };

    let entity_map: BTreeMap<RecordId, SourceRef> =
        records.iter().map(|r| (r.id, r.source_ref())).collect();

    info!(
        records = records.len(),
        clusters = clusters.len(),
        pairs = telemetry.pairs_evaluated,
        "run assembled"
    );

    ReconcileResult {
        clusters,
        golden_records: Vec::new(), // filled by the caller right after
        decisions,
        telemetry,
        entity_map,
        records,
        trained_fs_params: trained,
        spec_hash: spec_hash.to_string(),
        feedback,
    }
}

/// Full reconciliation over a materialized record set.
pub fn run_full(
    plan: &SpecPlan,
    spec_hash: &str,
    mut records: Vec<NormalizedRecord>,
    ingest_warnings: Vec<String>,
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    check_cancel(&options.cancel)?;
    sort_records_by_id(&mut records);
    let records_by_id: BTreeMap<RecordId, &NormalizedRecord> =
        records.iter().map(|r| (r.id, r)).collect();
    if records_by_id.len() != records.len() {
        return Err(EngineError::Internal("duplicate record ids in run".into()));
    }

    // ---- Block ----
    let blocking = block(&records, &plan.blocking, plan.skew_limit);
    let max_shared_keys = blocking.pairs.iter().map(|p| p.shared_keys).max().unwrap_or(0);
    debug!(pairs = blocking.pairs.len(), groups = blocking.group_count, "blocking done");
    check_cancel(&options.cancel)?;

    // ---- Feedback ----
    let edges = resolve_feedback(&options.feedback, &records);

    // ---- Train (FS only) + score ----
    let (trained, em_converged) = match &plan.scoring {
        ScoringConfig::WeightedSum => (None, true),
        ScoringConfig::FellegiSunter(_) => {
            let (params, converged) = train_fs(
                plan,
                spec_hash,
                &records,
                &records_by_id,
                &blocking.pairs,
                &edges.labels,
                options.learning_rate,
                &options.cancel,
            )?;
            (Some(params), converged)
        }
    };
    check_cancel(&options.cancel)?;

    let decisions = score_pairs(plan, &records_by_id, &blocking.pairs, trained.as_ref());
    check_cancel(&options.cancel)?;

    // ---- Cluster ----
    // Force-merge edges apply under weighted-sum only; labels shape EM
    // instead under Fellegi-Sunter. Forbids bind in both modes.
    let force: &[(RecordId, RecordId)] = match &plan.scoring {
        ScoringConfig::WeightedSum => &edges.force,
        ScoringConfig::FellegiSunter(_) => &[],
    };
    let accepted: Vec<PairScore> =
        decisions.iter().filter(|d| d.decision == Decision::Match).cloned().collect();
    let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
    let clustering = cluster_edges(&ids, &accepted, force, &edges.forbid, &[]);
    check_cancel(&options.cancel)?;

    if !em_converged {
        warn!("EM did not converge; continuing with best-so-far parameters");
    }

    // ---- Survive + assemble ----
    let mut result = assemble_result(AssembleInputs {
        plan,
        spec_hash,
        records,
        decisions,
        clusters: clustering.clusters,
        blocking_groups: blocking.group_count,
        skewed_groups: blocking.skewed_groups,
        max_shared_keys,
        blocked_unions: clustering.blocked_unions,
        conflicting_feedback: clustering.conflicting_feedback,
        trained,
        em_converged,
        feedback: options.feedback,
        health_flags: ingest_warnings,
    });
    let records_by_id: BTreeMap<RecordId, &NormalizedRecord> =
        result.records.iter().map(|r| (r.id, r)).collect();
    result.golden_records =
        build_golden_records(plan, &result.clusters, &records_by_id, None);
    Ok(result)
}
