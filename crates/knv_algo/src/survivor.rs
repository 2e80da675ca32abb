//! Survivorship: elect a canonical value per field for each cluster.
//!
//! Candidates are members whose value is non-missing. Winning values are
//! stored in the comparator's canonical form for fields that have a match
//! rule (so the golden record agrees with what scoring compared), and
//! trimmed verbatim otherwise. Every tie-break is total, so output is
//! deterministic for any member order.

use std::collections::BTreeMap;

use knv_core::records::NormalizedRecord;
use knv_core::result::GoldenRecord;
use knv_core::spec::{ComparatorKind, SurvivorshipConfig, SurvivorshipStrategy};

use crate::comparators::normalize_for;

/// One member's candidacy for a field.
struct Candidate<'a> {
    record: &'a NormalizedRecord,
    value: String,
}

/// Rank used for "source priority then recency" orderings. Lower wins.
fn stable_rank<'a>(
    cfg: &SurvivorshipConfig,
    c: &Candidate<'a>,
) -> ((usize, String), i64, &'a str) {
    (
        cfg.source_rank(&c.record.source_name),
        -c.record.last_updated.timestamp_millis(),
        c.record.external_id.as_str(),
    )
}

fn elect<'a>(
    strategy: SurvivorshipStrategy,
    cfg: &SurvivorshipConfig,
    mut candidates: Vec<Candidate<'a>>,
) -> Option<Candidate<'a>> {
    if candidates.is_empty() {
        return None;
    }
    match strategy {
        // First member from the highest-priority source; recency breaks
        // ties within a source. non_null shares the same stable order.
        SurvivorshipStrategy::SourcePriority | SurvivorshipStrategy::NonNull => {
            candidates.sort_by(|x, y| stable_rank(cfg, x).cmp(&stable_rank(cfg, y)));
            candidates.into_iter().next()
        }
        SurvivorshipStrategy::MostRecent => {
            candidates.sort_by(|x, y| {
                y.record
                    .last_updated
                    .cmp(&x.record.last_updated)
                    .then_with(|| stable_rank(cfg, x).cmp(&stable_rank(cfg, y)))
            });
            candidates.into_iter().next()
        }
        SurvivorshipStrategy::Longest => {
            candidates.sort_by(|x, y| {
                y.value
                    .chars()
                    .count()
                    .cmp(&x.value.chars().count())
                    .then_with(|| stable_rank(cfg, x).cmp(&stable_rank(cfg, y)))
            });
            candidates.into_iter().next()
        }
        SurvivorshipStrategy::Mode => {
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for c in &candidates {
                *counts.entry(c.value.clone()).or_insert(0) += 1;
            }
            candidates.sort_by(|x, y| {
                counts[y.value.as_str()]
                    .cmp(&counts[x.value.as_str()])
                    .then_with(|| stable_rank(cfg, x).cmp(&stable_rank(cfg, y)))
            });
            candidates.into_iter().next()
        }
    }
}

/// Assemble the golden record for one cluster.
///
/// `normalizers` maps field -> comparator kind for fields with a match
/// rule. `kanoniv_id` is derived by the caller from the cluster's sorted
/// member refs.
pub fn golden_record(
    members: &[&NormalizedRecord],
    cfg: &SurvivorshipConfig,
    normalizers: &BTreeMap<String, ComparatorKind>,
    kanoniv_id: String,
) -> GoldenRecord {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut provenance = BTreeMap::new();

    // Union of attributes seen anywhere in the cluster.
    let mut attributes: Vec<&str> = members
        .iter()
        .flat_map(|m| m.data.keys().map(String::as_str))
        .collect();
    attributes.sort_unstable();
    attributes.dedup();

    for field in attributes {
        let candidates: Vec<Candidate<'_>> = members
            .iter()
            .filter_map(|&m| {
                let raw = m.value(field)?;
                let value = match normalizers.get(field) {
                    Some(kind) => normalize_for(*kind, raw)
                        .unwrap_or_else(|| raw.trim().to_string()),
                    None => raw.trim().to_string(),
                };
                Some(Candidate { record: m, value })
            })
            .collect();

        let strategy = cfg.strategy_for(field);
        if let Some(winner) = elect(strategy, cfg, candidates) {
            provenance.insert(field.to_string(), winner.record.source_ref());
            fields.insert(field.to_string(), winner.value);
        }
    }

    GoldenRecord { kanoniv_id, fields, provenance }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use knv_core::records::RecordId;

    fn record(
        n: u8,
        source: &str,
        day: u32,
        fields: &[(&str, &str)],
    ) -> NormalizedRecord {
        let mut data = BTreeMap::new();
        for (k, v) in fields {
            data.insert(k.to_string(), v.to_string());
        }
        NormalizedRecord {
            id: RecordId::from_hash_bytes([n; 16]),
            source_name: source.into(),
            external_id: format!("e{n}"),
            entity_type: "person".into(),
            data,
            last_updated: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn cfg(priority: &[&str]) -> SurvivorshipConfig {
        SurvivorshipConfig {
            source_priority: priority.iter().map(|s| s.to_string()).collect(),
            per_field: BTreeMap::new(),
            default_strategy: SurvivorshipStrategy::SourcePriority,
        }
    }

    #[test]
    fn source_priority_skips_missing_values() {
        // CRM outranks billing but its company is empty, so billing wins;
        // the company rule normalizer strips the legal suffix.
        let crm = record(1, "crm", 3, &[("company", "")]);
        let billing = record(2, "billing", 2, &[("company", "Acme Inc.")]);
        let partners = record(3, "partners", 1, &[("company", "Acme Corporation")]);

        let mut normalizers = BTreeMap::new();
        normalizers.insert("company".to_string(), ComparatorKind::Company);

        let golden = golden_record(
            &[&crm, &billing, &partners],
            &cfg(&["crm", "billing", "partners"]),
            &normalizers,
            "k1".into(),
        );
        assert_eq!(golden.fields.get("company").map(String::as_str), Some("ACME"));
        assert_eq!(golden.provenance["company"].source_name, "billing");
    }

    #[test]
    fn most_recent_picks_latest_timestamp() {
        let older = record(1, "a", 1, &[("email", "old@x.com")]);
        let newer = record(2, "b", 9, &[("email", "new@x.com")]);
        let mut config = cfg(&["a", "b"]);
        config
            .per_field
            .insert("email".into(), SurvivorshipStrategy::MostRecent);

        let golden =
            golden_record(&[&older, &newer], &config, &BTreeMap::new(), "k".into());
        assert_eq!(golden.fields["email"], "new@x.com");
    }

    #[test]
    fn longest_breaks_ties_by_source_priority() {
        let a = record(1, "low", 1, &[("name", "Jonathan")]);
        let b = record(2, "high", 1, &[("name", "Jonathon")]);
        let mut config = cfg(&["high", "low"]);
        config.per_field.insert("name".into(), SurvivorshipStrategy::Longest);

        let golden = golden_record(&[&a, &b], &config, &BTreeMap::new(), "k".into());
        assert_eq!(golden.fields["name"], "Jonathon");
    }

    #[test]
    fn mode_prefers_the_most_frequent_value() {
        let a = record(1, "s1", 1, &[("city", "Portland")]);
        let b = record(2, "s2", 1, &[("city", "Portland")]);
        let c = record(3, "s3", 9, &[("city", "Salem")]);
        let mut config = cfg(&["s3", "s2", "s1"]);
        config.per_field.insert("city".into(), SurvivorshipStrategy::Mode);

        let golden = golden_record(&[&a, &b, &c], &config, &BTreeMap::new(), "k".into());
        assert_eq!(golden.fields["city"], "Portland");
    }

    #[test]
    fn non_null_covers_every_field_present_in_the_cluster() {
        let a = record(1, "s1", 1, &[("email", "e@x.com"), ("phone", "")]);
        let b = record(2, "s2", 1, &[("phone", "415-555-0100"), ("city", "Salem")]);
        let mut config = cfg(&[]);
        config.default_strategy = SurvivorshipStrategy::NonNull;

        let golden = golden_record(&[&a, &b], &config, &BTreeMap::new(), "k".into());
        assert_eq!(golden.fields.len(), 3);
        assert!(golden.fields.contains_key("email"));
        assert!(golden.fields.contains_key("phone"));
        assert!(golden.fields.contains_key("city"));
    }

    #[test]
    fn all_missing_field_is_absent_from_golden() {
        let a = record(1, "s1", 1, &[("fax", "")]);
        let b = record(2, "s2", 1, &[("fax", "  ")]);
        let golden =
            golden_record(&[&a, &b], &cfg(&[]), &BTreeMap::new(), "k".into());
        assert!(golden.fields.is_empty());
        assert!(golden.provenance.is_empty());
    }
}
