//! Structural spec diffing — compare two spec versions.
//!
//! Rules and sources are matched by name with field-level before/after for
//! modifications; blocking, decision, scoring, survivorship, and metadata
//! report changed flags plus delta descriptions; the aggregate summary is
//! one human-readable line.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::spec_loader::{RawRule, RawSpec};

/// Property-level change: (before, after) rendered as strings.
pub type PropDelta = BTreeMap<String, (String, String)>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleModification {
    pub field: String,
    pub changes: PropDelta,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceModification {
    pub name: String,
    pub changes: PropDelta,
}

/// Structural diff between two parsed specs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecDiff {
    pub rules_added: Vec<String>,
    pub rules_removed: Vec<String>,
    pub rules_modified: Vec<RuleModification>,
    pub sources_added: Vec<String>,
    pub sources_removed: Vec<String>,
    pub sources_modified: Vec<SourceModification>,
    pub blocking_changed: bool,
    pub blocking_deltas: Vec<String>,
    pub thresholds_changed: bool,
    pub decision_deltas: Vec<String>,
    pub scoring_changed: bool,
    pub scoring_deltas: Vec<String>,
    pub survivorship_changed: bool,
    pub survivorship_deltas: Vec<String>,
    pub metadata_changed: bool,
    pub metadata_deltas: Vec<String>,
    pub summary: String,
}

impl SpecDiff {
    pub fn is_empty(&self) -> bool {
        self.rules_added.is_empty()
            && self.rules_removed.is_empty()
            && self.rules_modified.is_empty()
            && self.sources_added.is_empty()
            && self.sources_removed.is_empty()
            && self.sources_modified.is_empty()
            && !self.blocking_changed
            && !self.thresholds_changed
            && !self.scoring_changed
            && !self.survivorship_changed
            && !self.metadata_changed
    }
}

fn fmt_f64(x: f64) -> String {
    format!("{x}")
}

fn delta(changes: &mut PropDelta, key: &str, before: String, after: String) {
    if before != after {
        changes.insert(key.to_string(), (before, after));
    }
}

fn diff_rule(a: &RawRule, b: &RawRule) -> PropDelta {
    let mut changes = PropDelta::new();
    delta(&mut changes, "comparator", a.comparator.clone(), b.comparator.clone());
    delta(&mut changes, "weight", fmt_f64(a.weight), fmt_f64(b.weight));
    let render = |t: &Option<crate::spec_loader::RawThresholds>| match t {
        Some(t) => format!("{}/{}/{}", t.exact, t.near, t.weak),
        None => "default".to_string(),
    };
    delta(&mut changes, "thresholds", render(&a.thresholds), render(&b.thresholds));
    changes
}

/// Compute the structural diff from `a` (before) to `b` (after).
pub fn diff_specs(a: &RawSpec, b: &RawSpec) -> SpecDiff {
    let mut diff = SpecDiff::default();

    // ---- Rules (keyed by field) ----
    let rules_a: BTreeMap<&str, &RawRule> =
        a.rules.iter().map(|r| (r.field.as_str(), r)).collect();
    let rules_b: BTreeMap<&str, &RawRule> =
        b.rules.iter().map(|r| (r.field.as_str(), r)).collect();

    for (field, rule_b) in &rules_b {
        match rules_a.get(field) {
            None => diff.rules_added.push(field.to_string()),
            Some(rule_a) => {
                let changes = diff_rule(rule_a, rule_b);
                if !changes.is_empty() {
                    diff.rules_modified
                        .push(RuleModification { field: field.to_string(), changes });
                }
            }
        }
    }
    for field in rules_a.keys() {
        if !rules_b.contains_key(field) {
            diff.rules_removed.push(field.to_string());
        }
    }

    // ---- Sources (keyed by name) ----
    let sources_a: BTreeMap<&str, &crate::spec_loader::RawSource> =
        a.sources.iter().map(|s| (s.name.as_str(), s)).collect();
    let sources_b: BTreeMap<&str, &crate::spec_loader::RawSource> =
        b.sources.iter().map(|s| (s.name.as_str(), s)).collect();

    for (name, source_b) in &sources_b {
        match sources_a.get(name) {
            None => diff.sources_added.push(name.to_string()),
            Some(source_a) => {
                if source_a.attributes != source_b.attributes {
                    let mut changes = PropDelta::new();
                    delta(
                        &mut changes,
                        "attributes",
                        format!("{:?}", source_a.attributes),
                        format!("{:?}", source_b.attributes),
                    );
                    diff.sources_modified
                        .push(SourceModification { name: name.to_string(), changes });
                }
            }
        }
    }
    for name in sources_a.keys() {
        if !sources_b.contains_key(name) {
            diff.sources_removed.push(name.to_string());
        }
    }

    // ---- Blocking ----
    if a.blocking != b.blocking {
        diff.blocking_changed = true;
        diff.blocking_deltas.push(format!(
            "blocking keys: {} -> {}",
            render_blocking(a),
            render_blocking(b)
        ));
    }

    // ---- Decision thresholds ----
    if a.decision != b.decision {
        diff.thresholds_changed = true;
        for (name, before, after) in [
            ("match", a.decision.match_threshold, b.decision.match_threshold),
            ("review", a.decision.review, b.decision.review),
            ("reject", a.decision.reject, b.decision.reject),
        ] {
            if before != after {
                diff.decision_deltas.push(format!("{name}: {before} -> {after}"));
            }
        }
    }

    // ---- Scoring ----
    if a.scoring != b.scoring {
        diff.scoring_changed = true;
        if a.scoring.method != b.scoring.method {
            diff.scoring_deltas
                .push(format!("method: {} -> {}", a.scoring.method, b.scoring.method));
        } else {
            diff.scoring_deltas.push("em configuration changed".to_string());
        }
    }

    // ---- Survivorship ----
    if a.survivorship != b.survivorship {
        diff.survivorship_changed = true;
        if a.survivorship.source_priority != b.survivorship.source_priority {
            diff.survivorship_deltas.push(format!(
                "source_priority: [{}] -> [{}]",
                a.survivorship.source_priority.join(", "),
                b.survivorship.source_priority.join(", ")
            ));
        }
        if a.survivorship.default != b.survivorship.default
            || a.survivorship.fields != b.survivorship.fields
        {
            diff.survivorship_deltas.push("field strategies changed".to_string());
        }
    }

    // ---- Metadata ----
    if a.entity.name() != b.entity.name() {
        diff.metadata_changed = true;
        diff.metadata_deltas
            .push(format!("entity: {} -> {}", a.entity.name(), b.entity.name()));
    }
    if a.identity_version != b.identity_version {
        diff.metadata_changed = true;
        diff.metadata_deltas.push(format!(
            "identity_version: {} -> {}",
            a.identity_version, b.identity_version
        ));
    }

    diff.summary = summarize(&diff);
    diff
}

fn render_blocking(spec: &RawSpec) -> String {
    let keys: Vec<String> = spec.blocking.iter().map(|k| k.fields.join("+")).collect();
    format!("[{}]", keys.join(", "))
}

fn summarize(diff: &SpecDiff) -> String {
    if diff.is_empty() {
        return "no changes".to_string();
    }
    let mut parts = Vec::new();
    let count = |n: usize, label: &str, parts: &mut Vec<String>| {
        if n > 0 {
            parts.push(format!("{n} {label}"));
        }
    };
    count(diff.rules_added.len(), "rule(s) added", &mut parts);
    count(diff.rules_removed.len(), "rule(s) removed", &mut parts);
    count(diff.rules_modified.len(), "rule(s) modified", &mut parts);
    count(diff.sources_added.len(), "source(s) added", &mut parts);
    count(diff.sources_removed.len(), "source(s) removed", &mut parts);
    count(diff.sources_modified.len(), "source(s) modified", &mut parts);
    for (flag, label) in [
        (diff.blocking_changed, "blocking changed"),
        (diff.thresholds_changed, "decision thresholds changed"),
        (diff.scoring_changed, "scoring changed"),
        (diff.survivorship_changed, "survivorship changed"),
        (diff.metadata_changed, "metadata changed"),
    ] {
        if flag {
            parts.push(label.to_string());
        }
    }
    parts.join(", ")
}
