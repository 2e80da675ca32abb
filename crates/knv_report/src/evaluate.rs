//! Three-layer evaluation of a reconciliation run.
//!
//! Layer 1 (structural) and layer 2 (stability) are always populated.
//! Layer 3 (ground truth) is populated only when labels are supplied:
//! predicted pairs are restricted to labeled records, then pair-level
//! TP/FP/FN yield precision, recall, and F1.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use knv_core::records::SourceRef;
use knv_core::result::{ReconcileResult, RuleTelemetry};

/// Evaluation metrics for an identity-resolution run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluateResult {
    // Layer 1: structural (always populated)
    pub total_records: usize,
    pub total_clusters: usize,
    pub merge_rate: f64,
    pub singletons: usize,
    pub singletons_pct: f64,
    pub largest_cluster: usize,
    /// size -> count
    pub cluster_distribution: BTreeMap<usize, usize>,
    pub pairs_evaluated: u64,
    pub decisions: BTreeMap<String, u64>,

    // Layer 2: stability (from telemetry)
    pub field_stats: Vec<RuleTelemetry>,
    pub blocking_groups: u64,
    pub health_flags: Vec<String>,

    // Layer 3: ground truth (None when no labels)
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    pub true_positives: Option<usize>,
    pub false_positives: Option<usize>,
    pub false_negatives: Option<usize>,
    pub predicted_pairs: Option<usize>,
    pub ground_truth_pairs: Option<usize>,
    pub ground_truth_clusters: Option<usize>,
}

impl EvaluateResult {
    /// Human-readable layered summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "Evaluation Results".to_string(),
            "=".repeat(50),
            String::new(),
            "  Structural".to_string(),
            "  ----------".to_string(),
            format!("  Total Records:      {}", self.total_records),
            format!("  Total Clusters:     {}", self.total_clusters),
            format!("  Merge Rate:         {:.1}%", self.merge_rate * 100.0),
            format!(
                "  Singletons:         {} ({:.1}%)",
                self.singletons,
                self.singletons_pct * 100.0
            ),
            format!("  Largest Cluster:    {}", self.largest_cluster),
            format!("  Pairs Evaluated:    {}", self.pairs_evaluated),
        ];
        for (kind, count) in &self.decisions {
            lines.push(format!("    {kind}: {count}"));
        }

        lines.push(String::new());
        lines.push("  Stability".to_string());
        lines.push("  ---------".to_string());
        lines.push(format!("  Blocking Groups:    {}", self.blocking_groups));
        if !self.field_stats.is_empty() {
            lines.push(format!("  Fields:             {}", self.field_stats.len()));
            for fs in &self.field_stats {
                let match_rate = if fs.evaluated > 0 {
                    fs.matched as f64 / fs.evaluated as f64
                } else {
                    0.0
                };
                lines.push(format!(
                    "    {}: avg_score={:.3}, matched={}/{} ({:.1}%)",
                    fs.rule,
                    fs.avg_score,
                    fs.matched,
                    fs.evaluated,
                    match_rate * 100.0
                ));
            }
        }
        for flag in &self.health_flags {
            lines.push(format!("    health: {flag}"));
        }

        if let (Some(p), Some(r), Some(f1)) = (self.precision, self.recall, self.f1) {
            lines.push(String::new());
            lines.push("  Ground Truth".to_string());
            lines.push("  ------------".to_string());
            lines.push(format!("  Precision:          {p:.4}"));
            lines.push(format!("  Recall:             {r:.4}"));
            lines.push(format!("  F1 Score:           {f1:.4}"));
        }

        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

type RefPair = (SourceRef, SourceRef);

/// Canonical pairwise set of a cluster list; each pair sorted so (A, B)
/// and (B, A) coincide.
fn pairs_from_clusters(clusters: &[BTreeSet<SourceRef>]) -> BTreeSet<RefPair> {
    let mut pairs = BTreeSet::new();
    for cluster in clusters {
        let members: Vec<&SourceRef> = cluster.iter().collect();
        for (i, a) in members.iter().enumerate() {
            for b in &members[i + 1..] {
                pairs.insert(((*a).clone(), (*b).clone()));
            }
        }
    }
    pairs
}

/// Clusters as member-ref sets, dropping memberships smaller than two.
fn clusters_as_refs(result: &ReconcileResult) -> Vec<BTreeSet<SourceRef>> {
    result
        .clusters
        .iter()
        .map(|cluster| {
            cluster
                .iter()
                .filter_map(|id| result.entity_map.get(id).cloned())
                .collect::<BTreeSet<SourceRef>>()
        })
        .filter(|members| members.len() >= 2)
        .collect()
}

// ---------------------------------------------------------------------------
// Core evaluation
// ---------------------------------------------------------------------------

/// Build the evaluation. `ground_truth` maps entity id -> member refs;
/// entities with fewer than two members are ignored.
pub fn evaluate(
    result: &ReconcileResult,
    ground_truth: Option<&BTreeMap<String, Vec<SourceRef>>>,
) -> EvaluateResult {
    // --- Layer 1: structural ---
    let total_records: usize = result.clusters.iter().map(Vec::len).sum();
    let total_clusters = result.clusters.len();
    let merge_rate = result.merge_rate();
    let singletons = result.clusters.iter().filter(|c| c.len() == 1).count();
    let singletons_pct =
        if total_clusters > 0 { singletons as f64 / total_clusters as f64 } else { 0.0 };
    let largest_cluster = result.clusters.iter().map(Vec::len).max().unwrap_or(0);
    let mut cluster_distribution: BTreeMap<usize, usize> = BTreeMap::new();
    for cluster in &result.clusters {
        *cluster_distribution.entry(cluster.len()).or_insert(0) += 1;
    }

    let mut out = EvaluateResult {
        total_records,
        total_clusters,
        merge_rate,
        singletons,
        singletons_pct,
        largest_cluster,
        cluster_distribution,
        pairs_evaluated: result.telemetry.pairs_evaluated,
        decisions: result.telemetry.decisions_by_type.clone(),
        field_stats: result.telemetry.rule_telemetry.clone(),
        blocking_groups: result.telemetry.blocking_groups,
        health_flags: result.telemetry.health_flags.clone(),
        precision: None,
        recall: None,
        f1: None,
        true_positives: None,
        false_positives: None,
        false_negatives: None,
        predicted_pairs: None,
        ground_truth_pairs: None,
        ground_truth_clusters: None,
    };

    // --- Layer 3: ground truth (optional) ---
    let Some(ground_truth) = ground_truth else {
        return out;
    };

    let gt_clusters: Vec<BTreeSet<SourceRef>> = ground_truth
        .values()
        .map(|members| members.iter().cloned().collect::<BTreeSet<SourceRef>>())
        .filter(|members| members.len() >= 2)
        .collect();

    let gt_records: BTreeSet<SourceRef> =
        gt_clusters.iter().flat_map(|c| c.iter().cloned()).collect();

    // Restrict predicted clusters to records present in the labels.
    let filtered_predicted: Vec<BTreeSet<SourceRef>> = clusters_as_refs(result)
        .into_iter()
        .map(|cluster| {
            cluster.intersection(&gt_records).cloned().collect::<BTreeSet<SourceRef>>()
        })
        .filter(|members| members.len() >= 2)
        .collect();

    let predicted_pairs = pairs_from_clusters(&filtered_predicted);
    let gt_pairs = pairs_from_clusters(&gt_clusters);

    let tp = predicted_pairs.intersection(&gt_pairs).count();
    let fp = predicted_pairs.difference(&gt_pairs).count();
    let fn_ = gt_pairs.difference(&predicted_pairs).count();

    let precision = if tp + fp > 0 { tp as f64 / (tp + fp) as f64 } else { 1.0 };
    let recall = if tp + fn_ > 0 { tp as f64 / (tp + fn_) as f64 } else { 1.0 };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };

    out.precision = Some(precision);
    out.recall = Some(recall);
    out.f1 = Some(f1);
    out.true_positives = Some(tp);
    out.false_positives = Some(fp);
    out.false_negatives = Some(fn_);
    out.predicted_pairs = Some(predicted_pairs.len());
    out.ground_truth_pairs = Some(gt_pairs.len());
    out.ground_truth_clusters = Some(gt_clusters.len());
    out
}
