//! Entity-level change detection between reconciliation runs.
//!
//! Each current entity is classified as created (all members new), merged
//! (members from two or more prior entities), or grown (one prior entity
//! plus new records); each prior entity as split (members scattered) or
//! removed (no members present). Unchanged entities are counted, not
//! listed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use knv_core::records::SourceRef;
use knv_core::result::ReconcileResult;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Grown,
    Merged,
    Split,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Grown => "grown",
            ChangeKind::Merged => "merged",
            ChangeKind::Split => "split",
            ChangeKind::Removed => "removed",
        }
    }
}

/// A single entity-level change between two runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityChange {
    pub kanoniv_id: String,
    pub kind: ChangeKind,
    /// All members of this entity (current side for created/grown/merged,
    /// prior side for split/removed).
    pub source_records: Vec<SourceRef>,
    /// Members that are new in the current run.
    pub new_records: Vec<SourceRef>,
    /// For grown/merged: the prior entity ids involved.
    /// For split: the current entity ids members scattered to.
    pub related_kanoniv_ids: Vec<String>,
    /// Golden-record fields that changed: field -> (old, new).
    pub field_changes: BTreeMap<String, (String, String)>,
}

/// Entity-level changes between two reconciliation runs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeLog {
    pub changes: Vec<EntityChange>,
    pub unchanged_count: usize,
}

impl ChangeLog {
    fn of_kind(&self, kind: ChangeKind) -> Vec<&EntityChange> {
        self.changes.iter().filter(|c| c.kind == kind).collect()
    }

    pub fn created(&self) -> Vec<&EntityChange> {
        self.of_kind(ChangeKind::Created)
    }
    pub fn grown(&self) -> Vec<&EntityChange> {
        self.of_kind(ChangeKind::Grown)
    }
    pub fn merged(&self) -> Vec<&EntityChange> {
        self.of_kind(ChangeKind::Merged)
    }
    pub fn split(&self) -> Vec<&EntityChange> {
        self.of_kind(ChangeKind::Split)
    }
    pub fn removed(&self) -> Vec<&EntityChange> {
        self.of_kind(ChangeKind::Removed)
    }

    /// One-line human-readable summary of all changes.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for kind in [
            ChangeKind::Created,
            ChangeKind::Grown,
            ChangeKind::Merged,
            ChangeKind::Split,
            ChangeKind::Removed,
        ] {
            let n = self.of_kind(kind).len();
            if n > 0 {
                parts.push(format!("{n} {}", kind.as_str()));
            }
        }
        if self.unchanged_count > 0 {
            parts.push(format!("{} unchanged", self.unchanged_count));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Invert: kanoniv_id -> member set.
fn kanoniv_to_sources(
    lookup: &BTreeMap<SourceRef, String>,
) -> BTreeMap<String, BTreeSet<SourceRef>> {
    let mut out: BTreeMap<String, BTreeSet<SourceRef>> = BTreeMap::new();
    for (source_ref, kid) in lookup {
        out.entry(kid.clone()).or_default().insert(source_ref.clone());
    }
    out
}

fn golden_fields<'a>(
    result: &'a ReconcileResult,
    kanoniv_id: &str,
) -> Option<&'a BTreeMap<String, String>> {
    result
        .golden_records
        .iter()
        .find(|g| g.kanoniv_id == kanoniv_id)
        .map(|g| &g.fields)
}

/// Field-level deltas between a prior entity's golden record and the
/// current one. Only populated for grown entities (single prior parent).
fn field_changes(
    previous: &ReconcileResult,
    current: &ReconcileResult,
    prior_kid: &str,
    current_kid: &str,
) -> BTreeMap<String, (String, String)> {
    let (Some(before), Some(after)) =
        (golden_fields(previous, prior_kid), golden_fields(current, current_kid))
    else {
        return BTreeMap::new();
    };
    let mut changes = BTreeMap::new();
    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        let old = before.get(key).cloned().unwrap_or_default();
        let new = after.get(key).cloned().unwrap_or_default();
        if old != new {
            changes.insert(key.clone(), (old, new));
        }
    }
    changes
}

/// Compute entity-level changes from `previous` to `current`.
pub fn compute_changes(previous: &ReconcileResult, current: &ReconcileResult) -> ChangeLog {
    let prev_lookup = previous.entity_lookup();
    let curr_lookup = current.entity_lookup();

    let prev_entities = kanoniv_to_sources(&prev_lookup);
    let curr_entities = kanoniv_to_sources(&curr_lookup);

    let mut changes: Vec<EntityChange> = Vec::new();
    let mut unchanged_count = 0usize;

    // Prior entities referenced from the current side.
    let mut prev_kids_seen: BTreeSet<String> = BTreeSet::new();

    // --- Current-side analysis ---
    for (curr_kid, curr_members) in &curr_entities {
        let new_records: Vec<SourceRef> = curr_members
            .iter()
            .filter(|m| !prev_lookup.contains_key(*m))
            .cloned()
            .collect();
        let prev_kids: BTreeSet<String> = curr_members
            .iter()
            .filter_map(|m| prev_lookup.get(m).cloned())
            .collect();
        prev_kids_seen.extend(prev_kids.iter().cloned());

        if prev_kids.is_empty() {
            changes.push(EntityChange {
                kanoniv_id: curr_kid.clone(),
                kind: ChangeKind::Created,
                source_records: curr_members.iter().cloned().collect(),
                new_records,
                related_kanoniv_ids: Vec::new(),
                field_changes: BTreeMap::new(),
            });
        } else if prev_kids.len() > 1 {
            changes.push(EntityChange {
                kanoniv_id: curr_kid.clone(),
                kind: ChangeKind::Merged,
                source_records: curr_members.iter().cloned().collect(),
                new_records,
                related_kanoniv_ids: prev_kids.into_iter().collect(),
                field_changes: BTreeMap::new(),
            });
        } else if !new_records.is_empty() {
            let prior_kid = prev_kids.into_iter().next().expect("one prior entity");
            changes.push(EntityChange {
                kanoniv_id: curr_kid.clone(),
                kind: ChangeKind::Grown,
                source_records: curr_members.iter().cloned().collect(),
                new_records,
                field_changes: field_changes(previous, current, &prior_kid, curr_kid),
                related_kanoniv_ids: vec![prior_kid],
            });
        } else {
            unchanged_count += 1;
        }
    }

    // --- Prior-side analysis (splits and removals) ---
    for (prev_kid, prev_members) in &prev_entities {
        if !prev_kids_seen.contains(prev_kid) {
            changes.push(EntityChange {
                kanoniv_id: prev_kid.clone(),
                kind: ChangeKind::Removed,
                source_records: prev_members.iter().cloned().collect(),
                new_records: Vec::new(),
                related_kanoniv_ids: Vec::new(),
                field_changes: BTreeMap::new(),
            });
            continue;
        }

        let curr_kids: BTreeSet<String> = prev_members
            .iter()
            .filter_map(|m| curr_lookup.get(m).cloned())
            .collect();
        if curr_kids.len() > 1 {
            changes.push(EntityChange {
                kanoniv_id: prev_kid.clone(),
                kind: ChangeKind::Split,
                source_records: prev_members.iter().cloned().collect(),
                new_records: Vec::new(),
                related_kanoniv_ids: curr_kids.into_iter().collect(),
                field_changes: BTreeMap::new(),
            });
        }
    }

    changes.sort_by(|a, b| (a.kind, &a.kanoniv_id).cmp(&(b.kind, &b.kanoniv_id)));
    ChangeLog { changes, unchanged_count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knv_core::records::RecordId;
    use knv_core::result::{GoldenRecord, Telemetry};

    fn rid(n: u8) -> RecordId {
        RecordId::from_hash_bytes([n; 16])
    }

    /// Result with clusters of record numbers; kanoniv ids are synthesized
    /// from the member list so identical membership gives identical ids.
    fn result(clusters: Vec<Vec<u8>>) -> ReconcileResult {
        let mut entity_map = BTreeMap::new();
        let mut golden_records = Vec::new();
        for cluster in &clusters {
            for &n in cluster {
                entity_map.insert(rid(n), SourceRef::new("s", n.to_string()));
            }
            let kid: Vec<String> = cluster.iter().map(|n| n.to_string()).collect();
            golden_records.push(GoldenRecord {
                kanoniv_id: format!("k{}", kid.join("-")),
                fields: BTreeMap::new(),
                provenance: BTreeMap::new(),
            });
        }
        ReconcileResult {
            clusters: clusters
                .into_iter()
                .map(|c| c.into_iter().map(rid).collect())
                .collect(),
            golden_records,
            decisions: vec![],
            telemetry: Telemetry::default(),
            entity_map,
            records: vec![],
            trained_fs_params: None,
            spec_hash: String::new(),
            feedback: vec![],
        }
    }

    #[test]
    fn grown_entity_reports_its_new_records() {
        let previous = result(vec![vec![1, 2]]);
        let current = result(vec![vec![1, 2, 3]]);
        let log = compute_changes(&previous, &current);
        assert_eq!(log.summary(), "1 grown");
        let change = &log.grown()[0];
        assert_eq!(change.new_records, vec![SourceRef::new("s", "3")]);
        assert_eq!(change.related_kanoniv_ids, vec!["k1-2".to_string()]);
    }

    #[test]
    fn merged_entity_lists_prior_parents() {
        let previous = result(vec![vec![1], vec![2]]);
        let current = result(vec![vec![1, 2]]);
        let log = compute_changes(&previous, &current);
        assert_eq!(log.merged().len(), 1);
        assert_eq!(
            log.merged()[0].related_kanoniv_ids,
            vec!["k1".to_string(), "k2".to_string()]
        );
    }

    #[test]
    fn created_removed_and_split_are_detected() {
        let previous = result(vec![vec![1, 2], vec![7, 8]]);
        // 1 and 2 scatter to separate entities; 7/8 vanish; 5/6 appear.
        let current = result(vec![vec![1, 3], vec![2, 4], vec![5, 6]]);
        let log = compute_changes(&previous, &current);
        assert_eq!(log.created().len(), 1);
        assert_eq!(log.split().len(), 1);
        assert_eq!(log.removed().len(), 1);
        assert_eq!(log.split()[0].kanoniv_id, "k1-2");
    }

    #[test]
    fn identical_runs_are_all_unchanged() {
        let previous = result(vec![vec![1, 2], vec![3, 4]]);
        let current = result(vec![vec![1, 2], vec![3, 4]]);
        let log = compute_changes(&previous, &current);
        assert!(log.is_empty());
        assert_eq!(log.unchanged_count, 2);
        assert_eq!(log.summary(), "2 unchanged");
    }
}
