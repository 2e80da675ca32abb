//! Run outputs: decisions, clusters, golden records, telemetry, trained
//! Fellegi-Sunter parameters, feedback labels, and the `ReconcileResult`
//! bundle returned by a run.
//!
//! Everything here references records by id, never by pointer; the record
//! store inside `ReconcileResult` owns the records for the run. All
//! collections are in canonical order when the bundle is returned.

use std::collections::BTreeMap;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::records::{NormalizedRecord, RecordId, SourceRef};
use crate::spec::{AgreementLevel, LEVEL_COUNT};

// ----------------------------- Decisions -----------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Decision {
    Match,
    Review,
    NoMatch,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Match => "match",
            Decision::Review => "review",
            Decision::NoMatch => "no_match",
        }
    }
}

/// One rule's contribution to a pair score.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldScore {
    pub rule: String,
    pub score: f64,
    pub level: AgreementLevel,
    /// True when either side was missing; the rule contributed 0.
    pub skipped: bool,
}

/// Scored pair with its decision.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PairScore {
    pub a: RecordId,
    pub b: RecordId,
    pub per_field: Vec<FieldScore>,
    pub total: f64,
    pub decision: Decision,
}

// ----------------------------- Feedback -----------------------------

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FeedbackKind {
    Match,
    NoMatch,
}

impl FromStr for FeedbackKind {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "match" => Ok(FeedbackKind::Match),
            "no_match" => Ok(FeedbackKind::NoMatch),
            _ => Err(CoreError::InvalidLabel),
        }
    }
}

/// A user-provided label for a pair of source records (active learning).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeedbackLabel {
    pub source_a: String,
    pub entity_a_id: String,
    pub source_b: String,
    pub entity_b_id: String,
    pub label: FeedbackKind,
}

impl FeedbackLabel {
    pub fn ref_a(&self) -> SourceRef {
        SourceRef::new(self.source_a.clone(), self.entity_a_id.clone())
    }
    pub fn ref_b(&self) -> SourceRef {
        SourceRef::new(self.source_b.clone(), self.entity_b_id.clone())
    }
}

// ----------------------------- Trained parameters -----------------------------

/// Per-rule m/u probabilities, dense over the agreement levels.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuleParams {
    pub rule: String,
    pub m: [f64; LEVEL_COUNT],
    pub u: [f64; LEVEL_COUNT],
}

/// Trained Fellegi-Sunter model: per-rule tables plus the match prior.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainedFsParams {
    pub lambda: f64,
    pub rules: Vec<RuleParams>,
}

// ----------------------------- Telemetry -----------------------------

#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RuleTelemetry {
    pub rule: String,
    pub evaluated: u64,
    pub matched: u64,
    pub skipped: u64,
    pub avg_score: f64,
}

/// Per-run counters and health annotations. Rule order is spec order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Telemetry {
    pub pairs_evaluated: u64,
    pub decisions_by_type: BTreeMap<String, u64>,
    pub blocking_groups: u64,
    /// `key_index:value` tokens for groups over the skew limit.
    pub skewed_groups: Vec<String>,
    /// Largest shared-key count seen across candidate pairs (diagnostic only).
    pub max_shared_keys: u32,
    pub rule_telemetry: Vec<RuleTelemetry>,
    pub scoring_method: String,
    pub merge_threshold: f64,
    pub health_flags: Vec<String>,
}

// ----------------------------- Golden records -----------------------------

/// Canonical synthesized record for one resolved entity.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GoldenRecord {
    /// Stable 32-hex id derived from the cluster's sorted member refs.
    pub kanoniv_id: String,
    pub fields: BTreeMap<String, String>,
    /// Winning member per field.
    pub provenance: BTreeMap<String, SourceRef>,
}

// ----------------------------- Result bundle -----------------------------

/// Everything a run produces, in canonical order. Lossless round-trip
/// through `.knv` persistence is what makes incremental runs possible.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReconcileResult {
    /// Clusters as sorted member-id lists, ordered by smallest member.
    pub clusters: Vec<Vec<RecordId>>,
    /// One golden record per cluster, aligned by index.
    pub golden_records: Vec<GoldenRecord>,
    pub decisions: Vec<PairScore>,
    pub telemetry: Telemetry,
    pub entity_map: BTreeMap<RecordId, SourceRef>,
    pub records: Vec<NormalizedRecord>,
    pub trained_fs_params: Option<TrainedFsParams>,
    pub spec_hash: String,
    pub feedback: Vec<FeedbackLabel>,
}

impl ReconcileResult {
    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }

    /// `1 - clusters/records`; higher means more deduplication.
    pub fn merge_rate(&self) -> f64 {
        let total: usize = self.clusters.iter().map(Vec::len).sum();
        if total == 0 {
            return 0.0;
        }
        1.0 - (self.clusters.len() as f64 / total as f64)
    }

    /// Pairs nearest the match threshold — candidates for human labeling.
    /// Review decisions always qualify; others qualify within `band` of the
    /// threshold. Sorted by distance from the threshold, nearest first.
    pub fn uncertain_pairs(&self, n: usize, band: f64) -> Vec<&PairScore> {
        let threshold = self.telemetry.merge_threshold;
        let mut out: Vec<&PairScore> = self
            .decisions
            .iter()
            .filter(|d| {
                d.decision == Decision::Review || (d.total - threshold).abs() <= band
            })
            .collect();
        out.sort_by(|x, y| {
            let dx = (x.total - threshold).abs();
            let dy = (y.total - threshold).abs();
            dx.total_cmp(&dy).then_with(|| (x.a, x.b).cmp(&(y.a, y.b)))
        });
        out.truncate(n);
        out
    }

    /// Cluster index of a record, if it is part of this result.
    pub fn cluster_of(&self, id: RecordId) -> Option<usize> {
        self.clusters.iter().position(|c| c.binary_search(&id).is_ok())
    }

    /// Reverse index mapping every source record to its canonical
    /// kanoniv id. The join table downstream systems use to link
    /// operational data back to resolved entities.
    pub fn entity_lookup(&self) -> BTreeMap<SourceRef, String> {
        let mut lookup = BTreeMap::new();
        for (i, cluster) in self.clusters.iter().enumerate() {
            let Some(golden) = self.golden_records.get(i) else { continue };
            for id in cluster {
                if let Some(source_ref) = self.entity_map.get(id) {
                    lookup.insert(source_ref.clone(), golden.kanoniv_id.clone());
                }
            }
        }
        lookup
    }
}
