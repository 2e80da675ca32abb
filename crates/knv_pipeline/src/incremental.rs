//! Incremental resolution against a previous run.
//!
//! Only pairs that touch at least one new record are re-blocked and
//! scored; prior clusters seed the union-find and unchanged clusters
//! reuse their prior golden records. Stored Fellegi-Sunter parameters are
//! reused unless `retrain` is set. Work is proportional to the new
//! records' block density, not corpus size.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use knv_algo::blocking::block;
use knv_algo::cluster::cluster_edges;
use knv_core::determinism::sort_records_by_id;
use knv_core::records::{NormalizedRecord, RecordId};
use knv_core::result::{Decision, FeedbackLabel, GoldenRecord, PairScore, ReconcileResult};
use knv_core::spec::{ScoringConfig, SpecPlan};

use crate::engine::{
    assemble_result, build_golden_records, check_cancel, resolve_feedback, score_pairs,
    train_fs, AssembleInputs,
};
use crate::{EngineError, ReconcileOptions};

pub fn run_incremental(
    plan: &SpecPlan,
    spec_hash: &str,
    previous: &ReconcileResult,
    new_records: Vec<NormalizedRecord>,
    options: ReconcileOptions,
) -> Result<ReconcileResult, EngineError> {
    check_cancel(&options.cancel)?;

    let mut health_flags = vec!["incremental".to_string()];

    // Spec drift is loud but not fatal.
    if !previous.spec_hash.is_empty() && previous.spec_hash != spec_hash {
        warn!(
            previous = %previous.spec_hash,
            current = %spec_hash,
            "spec has changed since the previous reconciliation; results may be \
             inconsistent — a full re-run is recommended"
        );
        health_flags.push("spec_hash_mismatch".to_string());
    }

    // ---- Merge record sets (prior records are immutable facts) ----
    let prior_ids: BTreeSet<RecordId> = previous.records.iter().map(|r| r.id).collect();
    let mut records: Vec<NormalizedRecord> = previous.records.clone();
    let mut new_ids: BTreeSet<RecordId> = BTreeSet::new();
    let mut skipped_existing = 0usize;
    for record in new_records {
        if prior_ids.contains(&record.id) {
            skipped_existing += 1;
            continue;
        }
        new_ids.insert(record.id);
        records.push(record);
    }
    if skipped_existing > 0 {
        health_flags.push(format!("records_already_known: {skipped_existing}"));
    }
    sort_records_by_id(&mut records);
    let records_by_id: BTreeMap<RecordId, &NormalizedRecord> =
        records.iter().map(|r| (r.id, r)).collect();

    // ---- Block, keeping only pairs that touch a new record ----
    let blocking = block(&records, &plan.blocking, plan.skew_limit);
    let fresh_pairs: Vec<_> = blocking
        .pairs
        .iter()
        .filter(|bp| new_ids.contains(&bp.pair.a) || new_ids.contains(&bp.pair.b))
        .copied()
        .collect();
    let max_shared_keys = fresh_pairs.iter().map(|p| p.shared_keys).max().unwrap_or(0);
    debug!(
        total_pairs = blocking.pairs.len(),
        fresh_pairs = fresh_pairs.len(),
        "incremental blocking done"
    );
    check_cancel(&options.cancel)?;

    // ---- Feedback: prior labels carry forward, new ones append ----
    let mut feedback: Vec<FeedbackLabel> = previous.feedback.clone();
    feedback.extend(options.feedback.iter().cloned());
    let edges = resolve_feedback(&feedback, &records);

    // ---- Parameters: reuse stored FS params unless told otherwise ----
    let (trained, em_converged) = match &plan.scoring {
        ScoringConfig::WeightedSum => (None, true),
        ScoringConfig::FellegiSunter(_) => {
            match (&previous.trained_fs_params, options.retrain) {
                (Some(params), false) => (Some(params.clone()), true),
                (stored, retrain) => {
                    if retrain {
                        health_flags.push("fs_retrained".to_string());
                    } else if stored.is_none() {
                        warn!("previous result carries no FS parameters; training now");
                        health_flags.push("fs_params_missing_retrained".to_string());
                    }
                    let (params, converged) = train_fs(
                        plan,
                        spec_hash,
                        &records,
                        &records_by_id,
                        &fresh_pairs,
                        &edges.labels,
                        options.learning_rate,
                        &options.cancel,
                    )?;
                    (Some(params), converged)
                }
            }
        }
    };
    check_cancel(&options.cancel)?;

    // ---- Score the fresh pairs only ----
    let fresh_decisions = score_pairs(plan, &records_by_id, &fresh_pairs, trained.as_ref());
    check_cancel(&options.cancel)?;

    // ---- Cluster: prior clusters seed the union-find ----
    let force: &[(RecordId, RecordId)] = match &plan.scoring {
        ScoringConfig::WeightedSum => &edges.force,
        ScoringConfig::FellegiSunter(_) => &[],
    };
    let accepted: Vec<PairScore> = fresh_decisions
        .iter()
        .filter(|d| d.decision == Decision::Match)
        .cloned()
        .collect();
    let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
    let clustering =
        cluster_edges(&ids, &accepted, force, &edges.forbid, &previous.clusters);
    check_cancel(&options.cancel)?;

    // ---- Combine decisions (old-old pairs were settled in the prior run) ----
    let fresh_keys: BTreeSet<(RecordId, RecordId)> =
        fresh_decisions.iter().map(|d| (d.a, d.b)).collect();
    let mut decisions = fresh_decisions;
    decisions.extend(
        previous
            .decisions
            .iter()
            .filter(|d| !fresh_keys.contains(&(d.a, d.b)))
            .cloned(),
    );

    // ---- Survivorship: unchanged clusters keep their golden records ----
    let prior_golden: BTreeMap<String, GoldenRecord> = previous
        .golden_records
        .iter()
        .map(|g| (g.kanoniv_id.clone(), g.clone()))
        .collect();

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
        feedback,
        health_flags,
    });
    let records_by_id: BTreeMap<RecordId, &NormalizedRecord> =
        result.records.iter().map(|r| (r.id, r)).collect();
    result.golden_records =
        build_golden_records(plan, &result.clusters, &records_by_id, Some(&prior_golden));
    Ok(result)
}
